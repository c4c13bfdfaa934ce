//! # kawai-tx
//!
//! The pure transform layer of the kawai bridge: parsing structural
//! schemas, translating them into relational column definitions,
//! decoding wire payloads into value trees, and shaping those trees
//! into positional rows. Nothing in this crate performs I/O; the
//! ingest workers in `kawai-io` drive it.

pub mod decode;
pub mod schema;
pub mod shape;
pub mod translate_avro;
pub mod translate_json;
pub mod translate_proto;
pub mod value;

pub use schema::{ParsedSchema, ResolvedSchema};
pub use value::{CellValue, Datum};

use kawai_core::{BadSchema, Column, PrimKind, PrimitiveSerde};

/// Translate a resolved schema into the root column for one topic role.
pub fn to_column(resolved: &ResolvedSchema, is_key: bool) -> Result<Column, BadSchema> {
    match resolved {
        ResolvedSchema::Primitive(serde) => Ok(primitive_column(*serde)),
        ResolvedSchema::Parsed { schema, .. } => match schema.as_ref() {
            ParsedSchema::Avro { root, named } => translate_avro::to_column(root, named, is_key),
            ParsedSchema::Json { root } => translate_json::to_column(root, is_key),
            ParsedSchema::Proto { message, .. } => translate_proto::to_column(message, is_key),
        },
    }
}

/// The column a primitive serde decodes into. Always nullable: keys may
/// be absent and tombstone values materialize as NULL.
pub fn primitive_column(serde: PrimitiveSerde) -> Column {
    let kind = match serde {
        PrimitiveSerde::Short => PrimKind::I16,
        PrimitiveSerde::Int => PrimKind::I32,
        PrimitiveSerde::Long => PrimKind::I64,
        PrimitiveSerde::Float => PrimKind::F32,
        PrimitiveSerde::Double => PrimKind::F64,
        PrimitiveSerde::String => PrimKind::Utf8,
        PrimitiveSerde::Binary => PrimKind::Bytes,
    };
    Column::prim(kind).nullable()
}
