//! Message-descriptor-oriented (Protobuf) translation.

use kawai_core::{BadSchema, Column, ColumnType, PrimKind};
use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor, OneofDescriptor};

/// Translate a message descriptor into a column definition.
pub fn to_column(message: &MessageDescriptor, _is_key: bool) -> Result<Column, BadSchema> {
    let mut stack = Vec::new();
    translate_message(message, &mut stack)
}

fn translate_message(
    message: &MessageDescriptor,
    stack: &mut Vec<String>,
) -> Result<Column, BadSchema> {
    if message.full_name() == "google.protobuf.Timestamp" {
        return Ok(Column::prim(PrimKind::TimestampMicros));
    }

    let full_name = message.full_name().to_string();
    if stack.contains(&full_name) {
        return Err(BadSchema::Recursion(full_name));
    }
    stack.push(full_name);

    let mut fields: Vec<(String, Column)> = Vec::new();
    let mut seen_oneofs: Vec<String> = Vec::new();

    for field in message.fields() {
        match real_oneof(&field) {
            Some(oneof) => {
                if seen_oneofs.iter().any(|name| name == oneof.name()) {
                    continue;
                }
                seen_oneofs.push(oneof.name().to_string());
                let mut branches = Vec::new();
                for member in oneof.fields() {
                    branches.push((
                        member.name().to_string(),
                        translate_scalar(member.kind(), stack)?,
                    ));
                }
                let union = Column::new(ColumnType::Union(branches))?.nullable();
                fields.push((oneof.name().to_string(), union));
            }
            None => {
                let column = translate_field(&field, stack)?;
                fields.push((field.name().to_string(), column));
            }
        }
    }

    stack.pop();
    Column::new(ColumnType::Struct(fields))
}

fn translate_field(field: &FieldDescriptor, stack: &mut Vec<String>) -> Result<Column, BadSchema> {
    if field.is_map() {
        let entry = match field.kind() {
            Kind::Message(entry) => entry,
            other => {
                return Err(BadSchema::Unsupported(format!(
                    "map field with kind {other:?}"
                )))
            }
        };
        let key_field = entry.map_entry_key_field();
        let value_field = entry.map_entry_value_field();
        let key = translate_scalar(key_field.kind(), stack)?;
        let value = translate_scalar(value_field.kind(), stack)?;
        return Column::new(ColumnType::Map(Box::new(key), Box::new(value)));
    }

    if field.is_list() {
        let item = translate_scalar(field.kind(), stack)?;
        return Column::new(ColumnType::List(Box::new(item)));
    }

    let column = translate_scalar(field.kind(), stack)?;
    // Message fields and proto3 optionals distinguish unset from default.
    Ok(if field.supports_presence() {
        column.nullable()
    } else {
        column
    })
}

fn translate_scalar(kind: Kind, stack: &mut Vec<String>) -> Result<Column, BadSchema> {
    Ok(match kind {
        Kind::Bool => Column::prim(PrimKind::Bool),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => Column::prim(PrimKind::I32),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => Column::prim(PrimKind::I64),
        Kind::Uint32 | Kind::Fixed32 => Column::prim(PrimKind::U32),
        Kind::Uint64 | Kind::Fixed64 => Column::prim(PrimKind::U64),
        Kind::Float => Column::prim(PrimKind::F32),
        Kind::Double => Column::prim(PrimKind::F64),
        Kind::String => Column::prim(PrimKind::Utf8),
        Kind::Bytes => Column::prim(PrimKind::Bytes),
        Kind::Enum(descriptor) => Column::new(ColumnType::Enum {
            name: descriptor.full_name().to_string(),
            symbols: descriptor.values().map(|v| v.name().to_string()).collect(),
        })?,
        Kind::Message(descriptor) => translate_message(&descriptor, stack)?,
    })
}

/// The oneof a field belongs to, ignoring the synthetic single-field
/// oneofs that proto3 `optional` desugars into.
fn real_oneof(field: &FieldDescriptor) -> Option<OneofDescriptor> {
    let oneof = field.containing_oneof()?;
    if oneof.fields().count() > 1 {
        Some(oneof)
    } else {
        None
    }
}
