//! JSON-Schema-oriented translation.
//!
//! Walks the schema document directly. Property order is significant
//! (it becomes column position), which is why this crate turns on
//! serde_json's `preserve_order`.

use kawai_core::{BadSchema, Column, ColumnType, PrimKind};
use serde_json::Value;

/// Translate a parsed JSON schema document into a column definition.
pub fn to_column(root: &Value, _is_key: bool) -> Result<Column, BadSchema> {
    let mut stack = Vec::new();
    translate(root, root, &mut stack)
}

fn translate(node: &Value, root: &Value, stack: &mut Vec<String>) -> Result<Column, BadSchema> {
    let obj = node
        .as_object()
        .ok_or_else(|| BadSchema::Unsupported("JSON schema node is not an object".to_string()))?;

    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        if stack.iter().any(|seen| seen == reference) {
            return Err(BadSchema::Recursion(reference.to_string()));
        }
        stack.push(reference.to_string());
        let target = resolve_ref(reference, root)?;
        let column = translate(target, root, stack)?;
        stack.pop();
        return Ok(column);
    }

    if let Some(members) = obj.get("oneOf").and_then(Value::as_array) {
        return translate_one_of(members, root, stack);
    }

    if let Some(symbols) = obj.get("enum").and_then(Value::as_array) {
        let symbols: Option<Vec<String>> = symbols
            .iter()
            .map(|s| s.as_str().map(str::to_string))
            .collect();
        let symbols =
            symbols.ok_or_else(|| BadSchema::Unsupported("non-string enum".to_string()))?;
        let name = obj
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("enum")
            .to_string();
        return Column::new(ColumnType::Enum { name, symbols });
    }

    let (type_name, nullable) = type_of(obj)?;
    let column = match type_name.as_str() {
        "boolean" | "bool" => Column::prim(PrimKind::Bool),
        "integer" | "int" | "long" => Column::prim(PrimKind::I64),
        "number" | "float" | "double" => Column::prim(PrimKind::F64),
        "string" => match obj.get("format").and_then(Value::as_str) {
            Some("date") => Column::prim(PrimKind::Date),
            Some("date-time") => Column::prim(PrimKind::TimestampMicros),
            Some("uuid") => Column::prim(PrimKind::Uuid),
            _ => Column::prim(PrimKind::Utf8),
        },
        "bytes" => Column::prim(PrimKind::Bytes),
        "array" => {
            let items = obj
                .get("items")
                .ok_or_else(|| BadSchema::Unsupported("array without items".to_string()))?;
            if items.is_array() {
                return Err(BadSchema::Unsupported("tuple-typed array".to_string()));
            }
            let item = translate(items, root, stack)?;
            Column::new(ColumnType::List(Box::new(item)))?
        }
        "object" => translate_object(obj, root, stack)?,
        other => return Err(BadSchema::Unsupported(format!("JSON schema type {other:?}"))),
    };
    Ok(if nullable { column.nullable() } else { column })
}

fn translate_object(
    obj: &serde_json::Map<String, Value>,
    root: &Value,
    stack: &mut Vec<String>,
) -> Result<Column, BadSchema> {
    let properties = obj.get("properties").and_then(Value::as_object);

    match properties {
        Some(properties) if !properties.is_empty() => {
            let required: Vec<&str> = obj
                .get("required")
                .and_then(Value::as_array)
                .map(|names| names.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            let mut fields = Vec::with_capacity(properties.len());
            for (name, subschema) in properties {
                let mut column = translate(subschema, root, stack)?;
                if !required.contains(&name.as_str()) {
                    column = column.nullable();
                }
                fields.push((name.clone(), column));
            }
            Column::new(ColumnType::Struct(fields))
        }
        // No declared properties: a string-keyed association.
        _ => match obj.get("additionalProperties") {
            Some(additional) if additional.is_object() => {
                let value = translate(additional, root, stack)?;
                Column::new(ColumnType::Map(
                    Box::new(Column::prim(PrimKind::Utf8)),
                    Box::new(value),
                ))
            }
            _ => Err(BadSchema::Unsupported(
                "object with neither properties nor additionalProperties".to_string(),
            )),
        },
    }
}

fn translate_one_of(
    members: &[Value],
    root: &Value,
    stack: &mut Vec<String>,
) -> Result<Column, BadSchema> {
    let mut nullable = false;
    let mut branches = Vec::new();
    for (position, member) in members.iter().enumerate() {
        if member.get("type").and_then(Value::as_str) == Some("null") {
            nullable = true;
            continue;
        }
        let tag = member
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| match member.get("type").and_then(Value::as_str) {
                Some(name) => name.to_string(),
                None => format!("alt{position}"),
            });
        branches.push((tag, translate(member, root, stack)?));
    }
    let column = match branches.len() {
        0 => {
            return Err(BadSchema::Unsupported(
                "oneOf with no non-null members".to_string(),
            ))
        }
        1 => branches.pop().map(|(_, column)| column).unwrap(),
        _ => Column::new(ColumnType::Union(branches))?,
    };
    Ok(if nullable { column.nullable() } else { column })
}

fn type_of(obj: &serde_json::Map<String, Value>) -> Result<(String, bool), BadSchema> {
    match obj.get("type") {
        Some(Value::String(name)) => Ok((name.clone(), false)),
        Some(Value::Array(names)) => {
            let mut nullable = false;
            let mut picked = None;
            for name in names.iter().filter_map(Value::as_str) {
                if name == "null" {
                    nullable = true;
                } else if picked.is_none() {
                    picked = Some(name.to_string());
                } else {
                    return Err(BadSchema::Unsupported(
                        "multi-typed JSON schema".to_string(),
                    ));
                }
            }
            let picked = picked
                .ok_or_else(|| BadSchema::Unsupported("null-only type".to_string()))?;
            Ok((picked, nullable))
        }
        // An untyped node with object keywords is still an object.
        None if obj.contains_key("properties") || obj.contains_key("additionalProperties") => {
            Ok(("object".to_string(), false))
        }
        _ => Err(BadSchema::Unsupported("schema without a type".to_string())),
    }
}

fn resolve_ref<'a>(reference: &str, root: &'a Value) -> Result<&'a Value, BadSchema> {
    let path = reference
        .strip_prefix("#/")
        .ok_or_else(|| BadSchema::Unsupported(format!("non-local $ref {reference:?}")))?;
    let mut node = root;
    for step in path.split('/') {
        node = node
            .get(step)
            .ok_or_else(|| BadSchema::Unsupported(format!("dangling $ref {reference:?}")))?;
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn translate_value(value: Value) -> Result<Column, BadSchema> {
        to_column(&value, false)
    }

    #[test]
    fn object_becomes_struct_with_required_nullability() {
        let column = translate_value(json!({
            "type": "object",
            "properties": {
                "a": {"type": "integer"},
                "b": {"type": "string"}
            },
            "required": ["a"]
        }))
        .unwrap();
        let flat = column.flatten_top_level().unwrap();
        assert_eq!(flat[0].0, "a");
        assert!(!flat[0].1.is_nullable());
        assert_eq!(flat[1].0, "b");
        assert!(flat[1].1.is_nullable());
    }

    #[test]
    fn scalar_root_stays_single_column() {
        let column = translate_value(json!({"type": "int"})).unwrap();
        assert_eq!(column.render_ddl(), "BIGINT");
        let flat = column.flatten_top_level().unwrap();
        assert_eq!(flat[0].0, "value");
    }

    #[test]
    fn string_formats_specialize() {
        let column = translate_value(json!({
            "type": "object",
            "properties": {
                "d": {"type": "string", "format": "date"},
                "ts": {"type": "string", "format": "date-time"},
                "u": {"type": "string", "format": "uuid"}
            },
            "required": ["d", "ts", "u"]
        }))
        .unwrap();
        let flat = column.flatten_top_level().unwrap();
        assert_eq!(flat[0].1.render_ddl(), "DATE");
        assert_eq!(flat[1].1.render_ddl(), "TIMESTAMP");
        assert_eq!(flat[2].1.render_ddl(), "UUID");
    }

    #[test]
    fn additional_properties_becomes_map() {
        let column = translate_value(json!({
            "type": "object",
            "additionalProperties": {"type": "number"}
        }))
        .unwrap();
        assert_eq!(column.render_ddl(), "MAP(VARCHAR, DOUBLE)");
    }

    #[test]
    fn one_of_becomes_union() {
        let column = translate_value(json!({
            "oneOf": [
                {"type": "null"},
                {"title": "num", "type": "integer"},
                {"title": "text", "type": "string"}
            ]
        }))
        .unwrap();
        assert_eq!(column.render_ddl(), r#"UNION("num" BIGINT, "text" VARCHAR)"#);
        assert!(column.is_nullable());
    }

    #[test]
    fn local_ref_resolves_and_recursion_is_rejected() {
        let column = translate_value(json!({
            "type": "object",
            "properties": {"side": {"$ref": "#/definitions/Side"}},
            "required": ["side"],
            "definitions": {"Side": {"enum": ["BUY", "SELL"]}}
        }))
        .unwrap();
        let flat = column.flatten_top_level().unwrap();
        assert_eq!(flat[0].1.render_ddl(), "ENUM('BUY', 'SELL')");

        let err = translate_value(json!({
            "type": "object",
            "properties": {"next": {"$ref": "#/definitions/Node"}},
            "definitions": {
                "Node": {
                    "type": "object",
                    "properties": {"next": {"$ref": "#/definitions/Node"}}
                }
            }
        }))
        .unwrap_err();
        assert!(matches!(err, BadSchema::Recursion(_)));
    }

    #[test]
    fn nullable_type_array() {
        let column = translate_value(json!({"type": ["null", "string"]})).unwrap();
        assert_eq!(column.render_ddl(), "VARCHAR");
        assert!(column.is_nullable());
    }
}
