//! Parsed structural schemas and the bindings they resolve into.

use std::collections::HashMap;
use std::sync::Arc;

use kawai_core::{PrimitiveSerde, SchemaFamily};
use prost_reflect::{DescriptorPool, MessageDescriptor};
use protox::file::{ChainFileResolver, File, FileResolver, GoogleFileResolver};

/// A schema failed to parse in its family's own grammar.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ParseError(pub String);

/// A parsed structural schema: the family tag plus the family's native
/// AST. Opaque to the decoder except through the family-specific
/// translator/decoder pair.
#[derive(Debug, Clone)]
pub enum ParsedSchema {
    Avro {
        root: apache_avro::Schema,
        /// Named types reachable from the root or its references, for
        /// resolving `Ref` nodes during translation and decoding.
        named: HashMap<String, apache_avro::Schema>,
    },
    Json {
        root: serde_json::Value,
    },
    Proto {
        pool: DescriptorPool,
        message: MessageDescriptor,
    },
}

impl ParsedSchema {
    pub fn family(&self) -> SchemaFamily {
        match self {
            ParsedSchema::Avro { .. } => SchemaFamily::Avro,
            ParsedSchema::Json { .. } => SchemaFamily::Json,
            ParsedSchema::Proto { .. } => SchemaFamily::Proto,
        }
    }
}

/// The outcome of resolving a `(topic, role)` binding: either a leaf
/// serde tag (no registry consulted) or a parsed structural schema with
/// the registry id it was obtained under. Inline schemas carry negative
/// synthetic ids.
#[derive(Debug, Clone)]
pub enum ResolvedSchema {
    Primitive(PrimitiveSerde),
    Parsed { id: i32, schema: Arc<ParsedSchema> },
}

/// Parse a schema body in the given family. `references` are named
/// subschemas the body may refer to; names matter only to the protobuf
/// family, where they double as import paths.
pub fn parse_schema(
    family: SchemaFamily,
    text: &str,
    references: &[(String, String)],
) -> Result<ParsedSchema, ParseError> {
    match family {
        SchemaFamily::Avro => parse_avro(text, references),
        SchemaFamily::Json => parse_json(text),
        SchemaFamily::Proto => parse_proto(text, references),
    }
}

fn parse_avro(text: &str, references: &[(String, String)]) -> Result<ParsedSchema, ParseError> {
    let schemas = if references.is_empty() {
        vec![apache_avro::Schema::parse_str(text).map_err(|e| ParseError(e.to_string()))?]
    } else {
        // Referenced schemas parse first so the root can name them.
        let mut inputs: Vec<&str> = references.iter().map(|(_, text)| text.as_str()).collect();
        inputs.push(text);
        apache_avro::Schema::parse_list(&inputs).map_err(|e| ParseError(e.to_string()))?
    };

    let mut named = HashMap::new();
    for schema in &schemas {
        collect_named(schema, &mut named);
    }
    let root = schemas
        .into_iter()
        .last()
        .ok_or_else(|| ParseError("empty schema list".to_string()))?;
    Ok(ParsedSchema::Avro { root, named })
}

fn collect_named(schema: &apache_avro::Schema, out: &mut HashMap<String, apache_avro::Schema>) {
    use apache_avro::Schema as S;
    match schema {
        S::Record(record) => {
            out.insert(record.name.fullname(None), schema.clone());
            for field in &record.fields {
                collect_named(&field.schema, out);
            }
        }
        S::Enum(inner) => {
            out.insert(inner.name.fullname(None), schema.clone());
        }
        S::Fixed(inner) => {
            out.insert(inner.name.fullname(None), schema.clone());
        }
        S::Array(inner) => collect_named(&inner.items, out),
        S::Map(inner) => collect_named(&inner.types, out),
        S::Union(inner) => {
            for variant in inner.variants() {
                collect_named(variant, out);
            }
        }
        S::Decimal(inner) => collect_named(&inner.inner, out),
        _ => {}
    }
}

fn parse_json(text: &str) -> Result<ParsedSchema, ParseError> {
    let root: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ParseError(e.to_string()))?;
    if !root.is_object() {
        return Err(ParseError("JSON schema must be an object".to_string()));
    }
    Ok(ParsedSchema::Json { root })
}

/// The synthetic file name a root protobuf schema compiles under.
const PROTO_ROOT: &str = "schema.proto";

struct SourceResolver {
    files: HashMap<String, String>,
}

impl FileResolver for SourceResolver {
    fn open_file(&self, name: &str) -> Result<File, protox::Error> {
        match self.files.get(name) {
            Some(source) => File::from_source(name, source),
            None => Err(protox::Error::file_not_found(name)),
        }
    }
}

fn parse_proto(text: &str, references: &[(String, String)]) -> Result<ParsedSchema, ParseError> {
    let mut files = HashMap::new();
    files.insert(PROTO_ROOT.to_string(), text.to_string());
    for (name, source) in references {
        files.insert(name.clone(), source.clone());
    }

    let mut resolver = ChainFileResolver::new();
    resolver.add(GoogleFileResolver::new());
    resolver.add(SourceResolver { files });

    let mut compiler = protox::Compiler::with_file_resolver(resolver);
    compiler.include_imports(true);
    compiler
        .open_file(PROTO_ROOT)
        .map_err(|e| ParseError(e.to_string()))?;
    let descriptors = compiler.file_descriptor_set();

    // The first message declared in the root file is the payload type.
    let root_file = descriptors
        .file
        .iter()
        .find(|f| f.name() == PROTO_ROOT)
        .ok_or_else(|| ParseError("root file missing from descriptor set".to_string()))?;
    let message_name = root_file
        .message_type
        .first()
        .map(|m| m.name().to_string())
        .ok_or_else(|| ParseError("proto schema declares no message".to_string()))?;
    let full_name = if root_file.package().is_empty() {
        message_name
    } else {
        format!("{}.{}", root_file.package(), message_name)
    };

    let pool = DescriptorPool::from_file_descriptor_set(descriptors)
        .map_err(|e| ParseError(e.to_string()))?;
    let message = pool
        .get_message_by_name(&full_name)
        .ok_or_else(|| ParseError(format!("message {full_name:?} not found in pool")))?;
    Ok(ParsedSchema::Proto { pool, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avro_record_parses() {
        let parsed = parse_schema(
            SchemaFamily::Avro,
            r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"long"}]}"#,
            &[],
        )
        .unwrap();
        match parsed {
            ParsedSchema::Avro { named, .. } => assert!(named.contains_key("Order")),
            other => panic!("unexpected family: {:?}", other.family()),
        }
    }

    #[test]
    fn avro_reference_parses() {
        let reference = r#"{"type":"enum","name":"Side","symbols":["BUY","SELL"]}"#;
        let root = r#"{"type":"record","name":"Trade","fields":[{"name":"side","type":"Side"}]}"#;
        let parsed = parse_schema(
            SchemaFamily::Avro,
            root,
            &[("Side".to_string(), reference.to_string())],
        )
        .unwrap();
        match parsed {
            ParsedSchema::Avro { named, .. } => {
                assert!(named.contains_key("Side"));
                assert!(named.contains_key("Trade"));
            }
            other => panic!("unexpected family: {:?}", other.family()),
        }
    }

    #[test]
    fn proto_first_message_selected() {
        let parsed = parse_schema(
            SchemaFamily::Proto,
            r#"
syntax = "proto3";
package shop;
message Order { int64 id = 1; string item = 2; }
message Ignored { bool x = 1; }
"#,
            &[],
        )
        .unwrap();
        match parsed {
            ParsedSchema::Proto { message, .. } => {
                assert_eq!(message.full_name(), "shop.Order");
            }
            other => panic!("unexpected family: {:?}", other.family()),
        }
    }

    #[test]
    fn garbage_rejected_per_family() {
        assert!(parse_schema(SchemaFamily::Avro, "{not avro", &[]).is_err());
        assert!(parse_schema(SchemaFamily::Json, "[1,2]", &[]).is_err());
        assert!(parse_schema(SchemaFamily::Proto, "message {", &[]).is_err());
    }
}
