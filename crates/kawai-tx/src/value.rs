//! Decoded value trees and the insert cells they shape into.

use bigdecimal::BigDecimal;
use duckdb::types::{TimeUnit, ToSql, ToSqlOutput, Value};

/// A decoded value, shaped by whichever family decoder produced it.
/// Struct fields keep decode order and are matched to columns by name;
/// maps keep insertion order.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Decimal(BigDecimal),
    Uuid(uuid::Uuid),
    /// Days since the Unix epoch.
    Date(i32),
    /// Microseconds since the Unix epoch.
    TimestampMicros(i64),
    /// An enum symbol, by name.
    Enum(String),
    List(Vec<Datum>),
    Map(Vec<(Datum, Datum)>),
    Struct(Vec<(String, Datum)>),
    /// A discriminated union value. The tag is absent when the wire
    /// format does not name the inhabited branch (JSON `oneOf`).
    Union {
        tag: Option<String>,
        value: Box<Datum>,
    },
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }
}

/// One positional cell of an insert. Leaves bind natively; composite
/// values arrive pre-rendered as DuckDB literal text and are cast by
/// the prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Text(String),
    Blob(Vec<u8>),
    Date(i32),
    TimestampMicros(i64),
}

impl ToSql for CellValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let value = match self {
            CellValue::Null => Value::Null,
            CellValue::Bool(v) => Value::Boolean(*v),
            CellValue::I8(v) => Value::TinyInt(*v),
            CellValue::I16(v) => Value::SmallInt(*v),
            CellValue::I32(v) => Value::Int(*v),
            CellValue::I64(v) => Value::BigInt(*v),
            CellValue::U8(v) => Value::UTinyInt(*v),
            CellValue::U16(v) => Value::USmallInt(*v),
            CellValue::U32(v) => Value::UInt(*v),
            CellValue::U64(v) => Value::UBigInt(*v),
            CellValue::F32(v) => Value::Float(*v),
            CellValue::F64(v) => Value::Double(*v),
            CellValue::Text(v) => Value::Text(v.clone()),
            CellValue::Blob(v) => Value::Blob(v.clone()),
            CellValue::Date(v) => Value::Date32(*v),
            CellValue::TimestampMicros(v) => Value::Timestamp(TimeUnit::Microsecond, *v),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}
