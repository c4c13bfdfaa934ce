//! Record-oriented (Avro) schema translation.

use std::collections::HashMap;

use apache_avro::schema::Schema;
use kawai_core::{BadSchema, Column, ColumnType, Nullability, PrimKind};

/// Translate an Avro schema into a column definition.
///
/// `named` maps full names to the named types reachable from the root,
/// so `Ref` nodes resolve without re-parsing. Pure and deterministic.
pub fn to_column(
    root: &Schema,
    named: &HashMap<String, Schema>,
    _is_key: bool,
) -> Result<Column, BadSchema> {
    let mut stack = Vec::new();
    translate(root, named, &mut stack)
}

fn translate(
    schema: &Schema,
    named: &HashMap<String, Schema>,
    stack: &mut Vec<String>,
) -> Result<Column, BadSchema> {
    match schema {
        Schema::Boolean => Ok(Column::prim(PrimKind::Bool)),
        Schema::Int => Ok(Column::prim(PrimKind::I32)),
        Schema::Long => Ok(Column::prim(PrimKind::I64)),
        Schema::Float => Ok(Column::prim(PrimKind::F32)),
        Schema::Double => Ok(Column::prim(PrimKind::F64)),
        Schema::Bytes => Ok(Column::prim(PrimKind::Bytes)),
        Schema::String => Ok(Column::prim(PrimKind::Utf8)),

        Schema::Date => Ok(Column::prim(PrimKind::Date)),
        Schema::TimeMillis => Ok(Column::prim(PrimKind::I32)),
        Schema::TimeMicros => Ok(Column::prim(PrimKind::I64)),
        Schema::TimestampMillis
        | Schema::TimestampMicros
        | Schema::TimestampNanos
        | Schema::LocalTimestampMillis
        | Schema::LocalTimestampMicros
        | Schema::LocalTimestampNanos => Ok(Column::prim(PrimKind::TimestampMicros)),
        Schema::Uuid => Ok(Column::prim(PrimKind::Uuid)),
        Schema::Duration => Column::new(ColumnType::Fixed(12)),

        Schema::Decimal(decimal) => Column::new(ColumnType::Decimal {
            precision: decimal.precision as u32,
            scale: decimal.scale as u32,
        }),
        Schema::Fixed(fixed) => Column::new(ColumnType::Fixed(fixed.size)),

        Schema::Enum(inner) => Column::new(ColumnType::Enum {
            name: inner.name.fullname(None),
            symbols: inner.symbols.clone(),
        }),

        Schema::Array(inner) => {
            let item = translate(&inner.items, named, stack)?;
            Column::new(ColumnType::List(Box::new(item)))
        }
        Schema::Map(inner) => {
            let value = translate(&inner.types, named, stack)?;
            Column::new(ColumnType::Map(
                Box::new(Column::prim(PrimKind::Utf8)),
                Box::new(value),
            ))
        }

        Schema::Record(record) => {
            let full_name = record.name.fullname(None);
            stack.push(full_name);
            let mut fields = Vec::with_capacity(record.fields.len());
            for field in &record.fields {
                let mut column = translate(&field.schema, named, stack)?;
                if let Some(default) = &field.default {
                    if default.is_null() {
                        column.null = Nullability::Null;
                    } else if let Some(expr) = default_expr(default) {
                        column.null = Nullability::Default(expr);
                    }
                }
                fields.push((field.name.clone(), column));
            }
            stack.pop();
            Column::new(ColumnType::Struct(fields))
        }

        Schema::Union(union) => {
            let mut nullable = false;
            let mut branches = Vec::new();
            for variant in union.variants() {
                if matches!(variant, Schema::Null) {
                    nullable = true;
                    continue;
                }
                branches.push((branch_tag(variant), translate(variant, named, stack)?));
            }
            let column = match branches.len() {
                0 => {
                    return Err(BadSchema::Unsupported(
                        "union with no non-null branches".to_string(),
                    ))
                }
                1 => branches.pop().map(|(_, column)| column).unwrap(),
                _ => Column::new(ColumnType::Union(branches))?,
            };
            Ok(if nullable { column.nullable() } else { column })
        }

        Schema::Ref { name } => {
            let full_name = name.fullname(None);
            if stack.contains(&full_name) {
                return Err(BadSchema::Recursion(full_name));
            }
            let target = named
                .get(&full_name)
                .ok_or_else(|| BadSchema::Unsupported(format!("dangling reference {full_name:?}")))?;
            translate(target, named, stack)
        }

        Schema::Null => Err(BadSchema::Unsupported("bare null schema".to_string())),
        other => Err(BadSchema::Unsupported(format!("avro schema {other:?}"))),
    }
}

/// The tag a union branch is addressed by: the full name for named
/// types, the canonical type name otherwise.
pub fn branch_tag(schema: &Schema) -> String {
    match schema {
        Schema::Null => "null".to_string(),
        Schema::Boolean => "boolean".to_string(),
        Schema::Int | Schema::Date | Schema::TimeMillis => "int".to_string(),
        Schema::Long
        | Schema::TimeMicros
        | Schema::TimestampMillis
        | Schema::TimestampMicros
        | Schema::TimestampNanos
        | Schema::LocalTimestampMillis
        | Schema::LocalTimestampMicros
        | Schema::LocalTimestampNanos => "long".to_string(),
        Schema::Float => "float".to_string(),
        Schema::Double => "double".to_string(),
        Schema::Bytes | Schema::BigDecimal => "bytes".to_string(),
        Schema::String | Schema::Uuid => "string".to_string(),
        Schema::Array(_) => "array".to_string(),
        Schema::Map(_) => "map".to_string(),
        Schema::Union(_) => "union".to_string(),
        Schema::Decimal(decimal) => branch_tag(&decimal.inner),
        Schema::Record(record) => record.name.fullname(None),
        Schema::Enum(inner) => inner.name.fullname(None),
        Schema::Fixed(inner) => inner.name.fullname(None),
        Schema::Duration => "duration".to_string(),
        Schema::Ref { name } => name.fullname(None),
    }
}

fn default_expr(default: &serde_json::Value) -> Option<String> {
    match default {
        serde_json::Value::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_schema, ParsedSchema};
    use kawai_core::SchemaFamily;

    fn translate_str(text: &str) -> Result<Column, BadSchema> {
        match parse_schema(SchemaFamily::Avro, text, &[]).unwrap() {
            ParsedSchema::Avro { root, named } => to_column(&root, &named, false),
            _ => unreachable!(),
        }
    }

    #[test]
    fn record_becomes_struct_in_field_order() {
        let column = translate_str(
            r#"{"type":"record","name":"R","fields":[
                {"name":"a","type":"int"},
                {"name":"b","type":"string"}]}"#,
        )
        .unwrap();
        let flat = column.flatten_top_level().unwrap();
        assert_eq!(flat[0].0, "a");
        assert_eq!(flat[0].1.render_ddl(), "INTEGER");
        assert_eq!(flat[1].0, "b");
        assert_eq!(flat[1].1.render_ddl(), "VARCHAR");
    }

    #[test]
    fn nullable_union_collapses_to_sibling() {
        let column = translate_str(r#"["null","string"]"#).unwrap();
        assert_eq!(column.render_ddl(), "VARCHAR");
        assert!(column.is_nullable());
    }

    #[test]
    fn wide_union_keeps_branches_and_nullability() {
        let column = translate_str(r#"["null","int","string"]"#).unwrap();
        assert_eq!(column.render_ddl(), r#"UNION("int" INTEGER, "string" VARCHAR)"#);
        assert!(column.is_nullable());
    }

    #[test]
    fn logical_types_map_by_meaning() {
        let column = translate_str(
            r#"{"type":"record","name":"T","fields":[
                {"name":"d","type":{"type":"int","logicalType":"date"}},
                {"name":"ts","type":{"type":"long","logicalType":"timestamp-micros"}},
                {"name":"u","type":{"type":"string","logicalType":"uuid"}},
                {"name":"price","type":{"type":"bytes","logicalType":"decimal","precision":10,"scale":2}}]}"#,
        )
        .unwrap();
        let flat = column.flatten_top_level().unwrap();
        assert_eq!(flat[0].1.render_ddl(), "DATE");
        assert_eq!(flat[1].1.render_ddl(), "TIMESTAMP");
        assert_eq!(flat[2].1.render_ddl(), "UUID");
        assert_eq!(flat[3].1.render_ddl(), "DECIMAL(10,2)");
    }

    #[test]
    fn containers_translate_recursively() {
        let column = translate_str(
            r#"{"type":"record","name":"C","fields":[
                {"name":"tags","type":{"type":"array","items":"string"}},
                {"name":"counts","type":{"type":"map","values":"long"}},
                {"name":"side","type":{"type":"enum","name":"Side","symbols":["BUY","SELL"]}},
                {"name":"hash","type":{"type":"fixed","name":"H","size":16}}]}"#,
        )
        .unwrap();
        let flat = column.flatten_top_level().unwrap();
        assert_eq!(flat[0].1.render_ddl(), "VARCHAR[]");
        assert_eq!(flat[1].1.render_ddl(), "MAP(VARCHAR, BIGINT)");
        assert_eq!(flat[2].1.render_ddl(), "ENUM('BUY', 'SELL')");
        assert_eq!(flat[3].1.render_ddl(), "BLOB");
    }

    #[test]
    fn self_reference_is_rejected() {
        let err = translate_str(
            r#"{"type":"record","name":"Node","fields":[
                {"name":"value","type":"long"},
                {"name":"next","type":["null","Node"]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BadSchema::Recursion(name) if name == "Node"));
    }

    #[test]
    fn translation_is_deterministic() {
        let text = r#"{"type":"record","name":"R","fields":[
            {"name":"a","type":["null","int","string"]},
            {"name":"b","type":{"type":"map","values":"double"}}]}"#;
        let first = translate_str(text).unwrap();
        let second = translate_str(text).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.render_ddl(), second.render_ddl());
    }
}
