//! # kawai-core
//!
//! Foundational types for the kawai ingest bridge: the recursive column
//! model that tables are derived from, the serde directive grammar that
//! binds topics to schemas, engine configuration, and the error kinds
//! shared by every layer.

pub mod column;
pub mod config;
pub mod serde_spec;

pub use column::{Column, ColumnType, Nullability, PrimKind};
pub use config::{EngineOptions, Role};
pub use serde_spec::{PrimitiveSerde, SchemaFamily, SerdeDirective};

/// A schema cannot be represented as a relational column.
///
/// Surfaces at the first record of the affected topic; the topic is then
/// marked degraded.
#[derive(Debug, thiserror::Error)]
pub enum BadSchema {
    #[error("recursive schema reference: {0}")]
    Recursion(String),

    #[error("struct {0:?} has no fields")]
    EmptyStruct(String),

    #[error("duplicate name {name:?} in {context}")]
    DuplicateName { context: String, name: String },

    #[error("empty name in {0}")]
    EmptyName(String),

    #[error("decimal bounds out of range: precision {precision}, scale {scale}")]
    BadDecimal { precision: u32, scale: u32 },

    #[error("enum {0:?} has no symbols")]
    EmptyEnum(String),

    #[error("map key must be a stringifiable primitive or enum, got {0}")]
    BadMapKey(String),

    #[error("unsupported schema shape: {0}")]
    Unsupported(String),
}

/// A single record's payload could not be decoded. Per-record: the record
/// is skipped and the topic's decode-error counter is incremented.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown magic byte 0x{0:02x}")]
    Magic(u8),

    #[error("payload truncated: {0}")]
    Truncated(&'static str),

    #[error("unknown union tag {0:?}")]
    UnknownUnionTag(String),

    #[error("{0}")]
    Family(String),
}

/// A decoded value tree does not fit its column shape. Per-record.
#[derive(Debug, thiserror::Error)]
#[error("row does not fit column shape: {0}")]
pub struct BadRow(pub String);

/// A missing or malformed engine option. Fatal at `init()`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing option: {0}")]
    Missing(&'static str),

    #[error("invalid serde directive {directive:?} for topic {topic:?}: {message}")]
    BadDirective {
        topic: String,
        directive: String,
        message: String,
    },

    #[error("invalid option {key:?}: {message}")]
    Invalid { key: String, message: String },
}

/// Schema resolution against the registry failed. Recovered locally by
/// falling back to the `binary` serde for the affected binding.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no schema registry configured")]
    Unconfigured,

    #[error("registry request failed: {0}")]
    Request(String),

    #[error("subject {0:?} has no registered schema")]
    NotFound(String),

    #[error("schema id {0} has no registered schema")]
    IdNotFound(i32),

    #[error("schema for {subject:?} failed to parse: {message}")]
    Parse { subject: String, message: String },
}

/// The analytic engine rejected a DDL or insert statement. Worker-fatal:
/// the topic is marked degraded.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("create table {table:?} failed: {message}")]
    Ddl { table: String, message: String },

    #[error("insert into {table:?} failed: {message}")]
    Insert { table: String, message: String },

    #[error("table {table:?}: value field collides with the key column {column:?}")]
    Collision { table: String, column: String },
}

/// An operation was attempted in the wrong facade state.
#[derive(Debug, thiserror::Error)]
#[error("{op} requires the engine to be {expected}, but it is {actual}")]
pub struct LifecycleError {
    pub op: &'static str,
    pub expected: &'static str,
    pub actual: &'static str,
}
