//! Wire payload decoding.
//!
//! Schema-bearing payloads are framed `0x00 || schema-id:be32 || body`;
//! primitive serdes own the whole payload. Body decoding is delegated
//! to the family the resolved schema belongs to and produces a
//! [`Datum`] tree for the row shaper.

use std::collections::HashMap;

use apache_avro::schema::Schema as AvroSchema;
use apache_avro::types::Value as AvroValue;
use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use kawai_core::{DecodeError, PrimitiveSerde};
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MapKey, MessageDescriptor};
use prost_reflect::Value as ProtoValue;

use crate::schema::ParsedSchema;
use crate::translate_avro::branch_tag;
use crate::value::Datum;

/// The framing prefix of a schema-bearing payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireEnvelope<'a> {
    pub schema_id: i32,
    pub body: &'a [u8],
}

/// Split a schema-bearing payload into its id and body.
pub fn split_envelope(payload: &[u8]) -> Result<WireEnvelope<'_>, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Truncated("empty payload"));
    }
    if payload[0] != 0x00 {
        return Err(DecodeError::Magic(payload[0]));
    }
    if payload.len() < 5 {
        return Err(DecodeError::Truncated("wire header"));
    }
    let schema_id = i32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
    Ok(WireEnvelope {
        schema_id,
        body: &payload[5..],
    })
}

/// Decode a primitive-serde payload. The payload is the whole value;
/// there is no envelope.
pub fn decode_primitive(serde: PrimitiveSerde, payload: &[u8]) -> Result<Datum, DecodeError> {
    let exact = |n: usize| {
        if payload.len() == n {
            Ok(())
        } else {
            Err(DecodeError::Truncated("fixed-width primitive"))
        }
    };
    Ok(match serde {
        PrimitiveSerde::Short => {
            exact(2)?;
            Datum::I32(i16::from_be_bytes([payload[0], payload[1]]) as i32)
        }
        PrimitiveSerde::Int => {
            exact(4)?;
            Datum::I32(i32::from_be_bytes(payload.try_into().unwrap()))
        }
        PrimitiveSerde::Long => {
            exact(8)?;
            Datum::I64(i64::from_be_bytes(payload.try_into().unwrap()))
        }
        PrimitiveSerde::Float => {
            exact(4)?;
            Datum::F32(f32::from_be_bytes(payload.try_into().unwrap()))
        }
        PrimitiveSerde::Double => {
            exact(8)?;
            Datum::F64(f64::from_be_bytes(payload.try_into().unwrap()))
        }
        PrimitiveSerde::String => Datum::Str(
            std::str::from_utf8(payload)
                .map_err(|_| DecodeError::Family("invalid UTF-8 string".to_string()))?
                .to_string(),
        ),
        PrimitiveSerde::Binary => Datum::Bytes(payload.to_vec()),
    })
}

/// Decode a wire body against a parsed schema.
pub fn decode_body(schema: &ParsedSchema, body: &[u8]) -> Result<Datum, DecodeError> {
    match schema {
        ParsedSchema::Avro { root, named } => decode_avro(root, named, body),
        ParsedSchema::Json { .. } => decode_json(body),
        ParsedSchema::Proto { message, .. } => decode_proto(message, body),
    }
}

fn decode_avro(
    root: &AvroSchema,
    named: &HashMap<String, AvroSchema>,
    body: &[u8],
) -> Result<Datum, DecodeError> {
    let mut reader = body;
    let value = if named.len() > 1 {
        let schemata: Vec<&AvroSchema> = named.values().collect();
        apache_avro::from_avro_datum_schemata(root, schemata, &mut reader, None)
    } else {
        apache_avro::from_avro_datum(root, &mut reader, None)
    }
    .map_err(|e| DecodeError::Family(e.to_string()))?;
    avro_to_datum(value, root, named)
}

fn avro_to_datum(
    value: AvroValue,
    schema: &AvroSchema,
    named: &HashMap<String, AvroSchema>,
) -> Result<Datum, DecodeError> {
    let schema = match schema {
        AvroSchema::Ref { name } => named
            .get(&name.fullname(None))
            .ok_or_else(|| DecodeError::Family(format!("dangling reference {:?}", name.fullname(None))))?,
        other => other,
    };

    Ok(match value {
        AvroValue::Null => Datum::Null,
        AvroValue::Boolean(v) => Datum::Bool(v),
        AvroValue::Int(v) => Datum::I32(v),
        AvroValue::Long(v) => Datum::I64(v),
        AvroValue::Float(v) => Datum::F32(v),
        AvroValue::Double(v) => Datum::F64(v),
        AvroValue::Bytes(v) => Datum::Bytes(v),
        AvroValue::String(v) => Datum::Str(v),
        AvroValue::Fixed(_, v) => Datum::Bytes(v),
        AvroValue::Enum(_, symbol) => Datum::Enum(symbol),
        AvroValue::Date(days) => Datum::Date(days),
        AvroValue::TimeMillis(v) => Datum::I32(v),
        AvroValue::TimeMicros(v) => Datum::I64(v),
        AvroValue::TimestampMillis(v) | AvroValue::LocalTimestampMillis(v) => {
            Datum::TimestampMicros(v * 1_000)
        }
        AvroValue::TimestampMicros(v) | AvroValue::LocalTimestampMicros(v) => {
            Datum::TimestampMicros(v)
        }
        AvroValue::TimestampNanos(v) | AvroValue::LocalTimestampNanos(v) => {
            Datum::TimestampMicros(v / 1_000)
        }
        AvroValue::Uuid(v) => Datum::Uuid(v),
        AvroValue::Duration(d) => Datum::Bytes(<[u8; 12]>::from(d).to_vec()),
        AvroValue::Decimal(decimal) => {
            let scale = match schema {
                AvroSchema::Decimal(inner) => inner.scale as i64,
                _ => 0,
            };
            let bytes: Vec<u8> = <Vec<u8>>::try_from(&decimal)
                .map_err(|e| DecodeError::Family(e.to_string()))?;
            Datum::Decimal(BigDecimal::new(BigInt::from_signed_bytes_be(&bytes), scale))
        }
        AvroValue::BigDecimal(v) => Datum::Decimal(v),

        AvroValue::Union(position, inner) => {
            let variants = match schema {
                AvroSchema::Union(union) => union.variants(),
                other => {
                    return Err(DecodeError::Family(format!(
                        "union value against {other:?}"
                    )))
                }
            };
            let variant = variants
                .get(position as usize)
                .ok_or_else(|| DecodeError::UnknownUnionTag(position.to_string()))?;
            if matches!(*inner, AvroValue::Null) {
                Datum::Null
            } else {
                Datum::Union {
                    tag: Some(branch_tag(variant)),
                    value: Box::new(avro_to_datum(*inner, variant, named)?),
                }
            }
        }

        AvroValue::Array(items) => {
            let item_schema = match schema {
                AvroSchema::Array(inner) => &inner.items,
                other => {
                    return Err(DecodeError::Family(format!(
                        "array value against {other:?}"
                    )))
                }
            };
            Datum::List(
                items
                    .into_iter()
                    .map(|item| avro_to_datum(item, item_schema, named))
                    .collect::<Result<_, _>>()?,
            )
        }

        AvroValue::Map(entries) => {
            let value_schema = match schema {
                AvroSchema::Map(inner) => &inner.types,
                other => {
                    return Err(DecodeError::Family(format!("map value against {other:?}")))
                }
            };
            let mut pairs = Vec::with_capacity(entries.len());
            for (key, entry) in entries {
                pairs.push((Datum::Str(key), avro_to_datum(entry, value_schema, named)?));
            }
            Datum::Map(pairs)
        }

        AvroValue::Record(fields) => {
            let record = match schema {
                AvroSchema::Record(record) => record,
                other => {
                    return Err(DecodeError::Family(format!(
                        "record value against {other:?}"
                    )))
                }
            };
            let mut out = Vec::with_capacity(fields.len());
            for (position, (name, field_value)) in fields.into_iter().enumerate() {
                let field_schema = record
                    .fields
                    .get(position)
                    .map(|f| &f.schema)
                    .ok_or_else(|| DecodeError::Family(format!("unexpected field {name:?}")))?;
                out.push((name, avro_to_datum(field_value, field_schema, named)?));
            }
            Datum::Struct(out)
        }
    })
}

fn decode_json(body: &[u8]) -> Result<Datum, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| DecodeError::Family(e.to_string()))?;
    Ok(json_to_datum(value))
}

fn json_to_datum(value: serde_json::Value) -> Datum {
    match value {
        serde_json::Value::Null => Datum::Null,
        serde_json::Value::Bool(v) => Datum::Bool(v),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Datum::I64(v)
            } else if let Some(v) = n.as_u64() {
                Datum::U64(v)
            } else {
                Datum::F64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(v) => Datum::Str(v),
        serde_json::Value::Array(items) => {
            Datum::List(items.into_iter().map(json_to_datum).collect())
        }
        serde_json::Value::Object(entries) => Datum::Struct(
            entries
                .into_iter()
                .map(|(name, v)| (name, json_to_datum(v)))
                .collect(),
        ),
    }
}

fn decode_proto(message: &MessageDescriptor, body: &[u8]) -> Result<Datum, DecodeError> {
    let body = skip_message_indexes(body)?;
    let decoded = DynamicMessage::decode(message.clone(), body)
        .map_err(|e| DecodeError::Family(e.to_string()))?;
    proto_message_to_datum(&decoded, message)
}

/// Strip the Confluent message-index path that may precede a protobuf
/// body. Only the first message type of the schema is addressable.
fn skip_message_indexes(body: &[u8]) -> Result<&[u8], DecodeError> {
    let (count, mut rest) = read_zigzag(body)?;
    if count == 0 {
        return Ok(rest);
    }
    let mut first = None;
    for _ in 0..count {
        let (index, next) = read_zigzag(rest)?;
        if first.is_none() {
            first = Some(index);
        }
        rest = next;
    }
    if count == 1 && first == Some(0) {
        Ok(rest)
    } else {
        Err(DecodeError::Family(
            "message-index path selects a nested message".to_string(),
        ))
    }
}

fn read_zigzag(input: &[u8]) -> Result<(i64, &[u8]), DecodeError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (position, byte) in input.iter().enumerate() {
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            let decoded = (value >> 1) as i64 ^ -((value & 1) as i64);
            return Ok((decoded, &input[position + 1..]));
        }
        shift += 7;
        if shift > 63 {
            return Err(DecodeError::Truncated("varint overflow"));
        }
    }
    Err(DecodeError::Truncated("varint"))
}

fn proto_message_to_datum(
    message: &DynamicMessage,
    descriptor: &MessageDescriptor,
) -> Result<Datum, DecodeError> {
    if descriptor.full_name() == "google.protobuf.Timestamp" {
        return Ok(Datum::TimestampMicros(timestamp_micros(message)));
    }

    let mut fields: Vec<(String, Datum)> = Vec::new();
    let mut seen_oneofs: Vec<String> = Vec::new();

    for field in descriptor.fields() {
        if let Some(oneof) = field.containing_oneof() {
            if oneof.fields().count() > 1 {
                if seen_oneofs.iter().any(|name| name == oneof.name()) {
                    continue;
                }
                seen_oneofs.push(oneof.name().to_string());
                let inhabited = oneof.fields().find(|member| message.has_field(member));
                let datum = match inhabited {
                    Some(member) => Datum::Union {
                        tag: Some(member.name().to_string()),
                        value: Box::new(proto_field_to_datum(message, &member)?),
                    },
                    None => Datum::Null,
                };
                fields.push((oneof.name().to_string(), datum));
                continue;
            }
        }
        let datum = if field.supports_presence() && !message.has_field(&field) {
            Datum::Null
        } else {
            proto_field_to_datum(message, &field)?
        };
        fields.push((field.name().to_string(), datum));
    }
    Ok(Datum::Struct(fields))
}

fn timestamp_micros(message: &DynamicMessage) -> i64 {
    let seconds = message
        .get_field_by_name("seconds")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let nanos = message
        .get_field_by_name("nanos")
        .and_then(|v| v.as_i32())
        .unwrap_or(0);
    seconds * 1_000_000 + i64::from(nanos) / 1_000
}

fn proto_field_to_datum(
    message: &DynamicMessage,
    field: &FieldDescriptor,
) -> Result<Datum, DecodeError> {
    let value = message.get_field(field).into_owned();
    if field.is_map() {
        let entries = match value {
            ProtoValue::Map(entries) => entries,
            other => return Err(DecodeError::Family(format!("map field held {other:?}"))),
        };
        let mut pairs = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            pairs.push((map_key_to_datum(key), proto_value_to_datum(entry, &field.kind())?));
        }
        return Ok(Datum::Map(pairs));
    }
    if field.is_list() {
        let items = match value {
            ProtoValue::List(items) => items,
            other => return Err(DecodeError::Family(format!("repeated field held {other:?}"))),
        };
        return Ok(Datum::List(
            items
                .into_iter()
                .map(|item| proto_value_to_datum(item, &field.kind()))
                .collect::<Result<_, _>>()?,
        ));
    }
    proto_value_to_datum(value, &field.kind())
}

fn map_key_to_datum(key: MapKey) -> Datum {
    match key {
        MapKey::Bool(v) => Datum::Bool(v),
        MapKey::I32(v) => Datum::I32(v),
        MapKey::I64(v) => Datum::I64(v),
        MapKey::U32(v) => Datum::U32(v),
        MapKey::U64(v) => Datum::U64(v),
        MapKey::String(v) => Datum::Str(v),
    }
}

fn proto_value_to_datum(value: ProtoValue, kind: &Kind) -> Result<Datum, DecodeError> {
    Ok(match value {
        ProtoValue::Bool(v) => Datum::Bool(v),
        ProtoValue::I32(v) => Datum::I32(v),
        ProtoValue::I64(v) => Datum::I64(v),
        ProtoValue::U32(v) => Datum::U32(v),
        ProtoValue::U64(v) => Datum::U64(v),
        ProtoValue::F32(v) => Datum::F32(v),
        ProtoValue::F64(v) => Datum::F64(v),
        ProtoValue::String(v) => Datum::Str(v),
        ProtoValue::Bytes(v) => Datum::Bytes(v.to_vec()),
        ProtoValue::EnumNumber(number) => {
            let descriptor = match kind {
                Kind::Enum(descriptor) => descriptor,
                other => {
                    return Err(DecodeError::Family(format!("enum value against {other:?}")))
                }
            };
            let symbol = descriptor
                .get_value(number)
                .ok_or_else(|| DecodeError::Family(format!("unknown enum number {number}")))?;
            Datum::Enum(symbol.name().to_string())
        }
        ProtoValue::Message(inner) => {
            let descriptor = match kind {
                Kind::Message(descriptor) => descriptor.clone(),
                other => {
                    return Err(DecodeError::Family(format!(
                        "message value against {other:?}"
                    )))
                }
            };
            proto_message_to_datum(&inner, &descriptor)?
        }
        other => {
            return Err(DecodeError::Family(format!(
                "unhandled protobuf value {other:?}"
            )))
        }
    })
}
