//! Serde directive grammar.
//!
//! A topic binds each of its two roles (key, value) to a directive that
//! says how payload bytes should be interpreted: a primitive serde, the
//! latest registry schema for the conventional subject, a schema fetched
//! by id, or a schema carried inline in the configuration.

use crate::ConfigError;

/// Leaf serdes that decode without consulting any registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveSerde {
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Binary,
}

impl PrimitiveSerde {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveSerde::Short => "short",
            PrimitiveSerde::Int => "int",
            PrimitiveSerde::Long => "long",
            PrimitiveSerde::Float => "float",
            PrimitiveSerde::Double => "double",
            PrimitiveSerde::String => "string",
            PrimitiveSerde::Binary => "binary",
        }
    }
}

/// The class of schema language a structural schema belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaFamily {
    /// Record-oriented (Avro).
    Avro,
    /// JSON-Schema-oriented.
    Json,
    /// Message-descriptor-oriented (Protobuf).
    Proto,
}

impl SchemaFamily {
    pub fn parse(s: &str) -> Option<SchemaFamily> {
        match s.to_ascii_lowercase().as_str() {
            "avro" => Some(SchemaFamily::Avro),
            "json" => Some(SchemaFamily::Json),
            "proto" | "protobuf" => Some(SchemaFamily::Proto),
            _ => None,
        }
    }

    /// The registry's `schemaType` string for this family.
    pub fn registry_name(&self) -> &'static str {
        match self {
            SchemaFamily::Avro => "AVRO",
            SchemaFamily::Json => "JSON",
            SchemaFamily::Proto => "PROTOBUF",
        }
    }

    pub fn from_registry_name(s: &str) -> Option<SchemaFamily> {
        match s {
            "AVRO" => Some(SchemaFamily::Avro),
            "JSON" => Some(SchemaFamily::Json),
            "PROTOBUF" => Some(SchemaFamily::Proto),
            _ => None,
        }
    }
}

/// How a topic role's schema is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerdeDirective {
    /// Decode with a fixed-width or UTF-8 rule; no registry I/O.
    Primitive(PrimitiveSerde),
    /// Look up `<topic>-<role>` in the registry and take the latest version.
    Latest,
    /// Fetch a schema by its registry id.
    ById(i32),
    /// A schema carried in the directive itself, base64-encoded, with any
    /// referenced subschemas appended after `+` separators.
    Inline {
        family: SchemaFamily,
        schema: String,
        references: Vec<String>,
    },
}

impl SerdeDirective {
    /// Parse one of the literal directive forms:
    /// `short|int|long|float|double|string|binary`, `latest`, `id:<int>`,
    /// or `inline:<type>:<base64>[+<base64>...]`.
    pub fn parse(topic: &str, raw: &str) -> Result<SerdeDirective, ConfigError> {
        let bad = |message: &str| ConfigError::BadDirective {
            topic: topic.to_string(),
            directive: raw.to_string(),
            message: message.to_string(),
        };

        match raw {
            "short" => return Ok(SerdeDirective::Primitive(PrimitiveSerde::Short)),
            "int" => return Ok(SerdeDirective::Primitive(PrimitiveSerde::Int)),
            "long" => return Ok(SerdeDirective::Primitive(PrimitiveSerde::Long)),
            "float" => return Ok(SerdeDirective::Primitive(PrimitiveSerde::Float)),
            "double" => return Ok(SerdeDirective::Primitive(PrimitiveSerde::Double)),
            "string" => return Ok(SerdeDirective::Primitive(PrimitiveSerde::String)),
            "binary" => return Ok(SerdeDirective::Primitive(PrimitiveSerde::Binary)),
            "latest" => return Ok(SerdeDirective::Latest),
            _ => {}
        }

        if let Some(id) = raw.strip_prefix("id:") {
            let id: i32 = id.parse().map_err(|_| bad("id must be an integer"))?;
            return Ok(SerdeDirective::ById(id));
        }

        if let Some(rest) = raw.strip_prefix("inline:") {
            let (family, blobs) = rest
                .split_once(':')
                .ok_or_else(|| bad("expected inline:<type>:<base64>"))?;
            let family = SchemaFamily::parse(family)
                .ok_or_else(|| bad("schema type must be avro, json, or proto"))?;

            let mut decoded = Vec::new();
            for blob in blobs.split('+') {
                let bytes = base64::decode(blob).map_err(|_| bad("invalid base64 schema"))?;
                let text =
                    String::from_utf8(bytes).map_err(|_| bad("schema is not valid UTF-8"))?;
                decoded.push(text);
            }
            let schema = decoded.remove(0);
            return Ok(SerdeDirective::Inline {
                family,
                schema,
                references: decoded,
            });
        }

        Err(bad("unrecognized directive"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_forms() {
        for (raw, tag) in [
            ("short", PrimitiveSerde::Short),
            ("int", PrimitiveSerde::Int),
            ("long", PrimitiveSerde::Long),
            ("float", PrimitiveSerde::Float),
            ("double", PrimitiveSerde::Double),
            ("string", PrimitiveSerde::String),
            ("binary", PrimitiveSerde::Binary),
        ] {
            assert_eq!(
                SerdeDirective::parse("t", raw).unwrap(),
                SerdeDirective::Primitive(tag)
            );
        }
    }

    #[test]
    fn registry_forms() {
        assert_eq!(SerdeDirective::parse("t", "latest").unwrap(), SerdeDirective::Latest);
        assert_eq!(
            SerdeDirective::parse("t", "id:42").unwrap(),
            SerdeDirective::ById(42)
        );
        assert!(SerdeDirective::parse("t", "id:abc").is_err());
    }

    #[test]
    fn inline_form() {
        let schema = r#"{"type":"int"}"#;
        let raw = format!("inline:json:{}", base64::encode(schema));
        match SerdeDirective::parse("t", &raw).unwrap() {
            SerdeDirective::Inline {
                family,
                schema: text,
                references,
            } => {
                assert_eq!(family, SchemaFamily::Json);
                assert_eq!(text, schema);
                assert!(references.is_empty());
            }
            other => panic!("unexpected directive: {other:?}"),
        }
    }

    #[test]
    fn inline_with_references() {
        let root = base64::encode(r#"{"type":"record"}"#);
        let dep = base64::encode(r#"{"type":"enum"}"#);
        let raw = format!("inline:avro:{root}+{dep}");
        match SerdeDirective::parse("t", &raw).unwrap() {
            SerdeDirective::Inline { references, .. } => assert_eq!(references.len(), 1),
            other => panic!("unexpected directive: {other:?}"),
        }
    }

    #[test]
    fn junk_rejected() {
        assert!(SerdeDirective::parse("t", "csv").is_err());
        assert!(SerdeDirective::parse("t", "inline:avro").is_err());
        assert!(SerdeDirective::parse("t", "inline:thrift:AA==").is_err());
    }
}
