//! Row shaping: walking a decoded value tree against a column
//! definition to produce the positional cells of one insert.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use kawai_core::{BadRow, Column, ColumnType, PrimKind};
use std::str::FromStr;

use crate::value::{CellValue, Datum};

/// Shape one record into its positional row: the key cell followed by
/// the value cells.
///
/// A struct-typed value column is flattened into one cell per field; any
/// other value column contributes a single cell. A null record value (a
/// tombstone) yields all-null value cells.
pub fn shape_row(
    key: &Datum,
    key_column: &Column,
    value: &Datum,
    value_column: &Column,
) -> Result<Vec<CellValue>, BadRow> {
    let mut row = Vec::new();
    row.push(shape(key, key_column)?);

    match &value_column.ty {
        ColumnType::Struct(fields) => {
            if value.is_null() {
                row.extend(std::iter::repeat(CellValue::Null).take(fields.len()));
                return Ok(row);
            }
            let decoded = match value {
                Datum::Struct(decoded) => decoded,
                other => {
                    return Err(BadRow(format!(
                        "expected a struct value, decoded {other:?}"
                    )))
                }
            };
            for (name, column) in fields {
                let field = decoded
                    .iter()
                    .find(|(decoded_name, _)| decoded_name == name)
                    .map(|(_, datum)| datum);
                match field {
                    Some(datum) => row.push(shape(datum, column)?),
                    None if column.is_nullable() => row.push(CellValue::Null),
                    None => return Err(BadRow(format!("missing required field {name:?}"))),
                }
            }
        }
        _ if value.is_null() => row.push(CellValue::Null),
        _ => row.push(shape(value, value_column)?),
    }
    Ok(row)
}

/// Shape a single decoded value into one insert cell.
pub fn shape(datum: &Datum, column: &Column) -> Result<CellValue, BadRow> {
    if datum.is_null() {
        return if column.is_nullable() {
            Ok(CellValue::Null)
        } else {
            Err(BadRow("null value for a required column".to_string()))
        };
    }

    // A discriminated value whose union collapsed to its only real
    // branch sheds the wrapper here.
    if let Datum::Union { value, .. } = datum {
        if !matches!(column.ty, ColumnType::Union(_)) {
            return shape(value, column);
        }
    }

    match &column.ty {
        ColumnType::Prim(kind) => shape_prim(datum, *kind),
        ColumnType::Decimal { scale, .. } => shape_decimal(datum, *scale),
        ColumnType::Fixed(_) => match datum {
            Datum::Bytes(v) => Ok(CellValue::Blob(v.clone())),
            other => Err(BadRow(format!("expected fixed bytes, decoded {other:?}"))),
        },
        ColumnType::Enum { symbols, .. } => {
            let symbol = match datum {
                Datum::Enum(s) | Datum::Str(s) => s,
                other => return Err(BadRow(format!("expected enum symbol, decoded {other:?}"))),
            };
            if symbols.iter().any(|known| known == symbol) {
                Ok(CellValue::Text(symbol.clone()))
            } else {
                Err(BadRow(format!("symbol {symbol:?} is not in the enum")))
            }
        }
        // Composite cells travel as DuckDB literal text; the prepared
        // insert casts them to the column type.
        ColumnType::List(_) | ColumnType::Map(_, _) | ColumnType::Struct(_) => {
            Ok(CellValue::Text(render_literal(datum, column)?))
        }
        ColumnType::Union(branches) => {
            let (tag, inner) = match datum {
                Datum::Union { tag, value } => (tag.as_deref(), value.as_ref()),
                untagged => (None, untagged),
            };
            let branch = match tag {
                Some(tag) => Some(
                    branches
                        .iter()
                        .find(|(name, _)| name == tag)
                        .ok_or_else(|| BadRow(format!("union tag {tag:?} has no branch")))?,
                ),
                None => None,
            };
            match branch {
                Some((_, column)) => Ok(CellValue::Text(render_value(inner, column)?)),
                // No tag on the wire: the first branch the value fits wins.
                None => branches
                    .iter()
                    .find_map(|(_, column)| render_value(inner, column).ok())
                    .map(CellValue::Text)
                    .ok_or_else(|| BadRow("value fits no union branch".to_string())),
            }
        }
    }
}

fn shape_prim(datum: &Datum, kind: PrimKind) -> Result<CellValue, BadRow> {
    let mismatch = || BadRow(format!("decoded {datum:?} does not fit {}", kind.ddl()));

    match kind {
        PrimKind::Bool => match datum {
            Datum::Bool(v) => Ok(CellValue::Bool(*v)),
            _ => Err(mismatch()),
        },
        PrimKind::I8 => as_i64(datum)
            .and_then(|v| i8::try_from(v).ok())
            .map(CellValue::I8)
            .ok_or_else(mismatch),
        PrimKind::I16 => as_i64(datum)
            .and_then(|v| i16::try_from(v).ok())
            .map(CellValue::I16)
            .ok_or_else(mismatch),
        PrimKind::I32 => as_i64(datum)
            .and_then(|v| i32::try_from(v).ok())
            .map(CellValue::I32)
            .ok_or_else(mismatch),
        PrimKind::I64 => as_i64(datum).map(CellValue::I64).ok_or_else(mismatch),
        PrimKind::U8 => as_u64(datum)
            .and_then(|v| u8::try_from(v).ok())
            .map(CellValue::U8)
            .ok_or_else(mismatch),
        PrimKind::U16 => as_u64(datum)
            .and_then(|v| u16::try_from(v).ok())
            .map(CellValue::U16)
            .ok_or_else(mismatch),
        PrimKind::U32 => as_u64(datum)
            .and_then(|v| u32::try_from(v).ok())
            .map(CellValue::U32)
            .ok_or_else(mismatch),
        PrimKind::U64 => as_u64(datum).map(CellValue::U64).ok_or_else(mismatch),
        PrimKind::F32 => match datum {
            Datum::F32(v) => Ok(CellValue::F32(*v)),
            _ => Err(mismatch()),
        },
        PrimKind::F64 => match datum {
            Datum::F64(v) => Ok(CellValue::F64(*v)),
            Datum::F32(v) => Ok(CellValue::F64(f64::from(*v))),
            _ => as_i64(datum)
                .map(|v| CellValue::F64(v as f64))
                .ok_or_else(mismatch),
        },
        PrimKind::Utf8 => match datum {
            Datum::Str(v) | Datum::Enum(v) => Ok(CellValue::Text(v.clone())),
            _ => Err(mismatch()),
        },
        PrimKind::Bytes => match datum {
            Datum::Bytes(v) => Ok(CellValue::Blob(v.clone())),
            Datum::Str(v) => Ok(CellValue::Blob(v.clone().into_bytes())),
            _ => Err(mismatch()),
        },
        PrimKind::Date => match datum {
            Datum::Date(days) => Ok(CellValue::Date(*days)),
            Datum::I32(days) => Ok(CellValue::Date(*days)),
            Datum::Str(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(|date| CellValue::Date(days_since_epoch(date)))
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        PrimKind::TimestampMicros => match datum {
            Datum::TimestampMicros(v) => Ok(CellValue::TimestampMicros(*v)),
            Datum::I64(v) => Ok(CellValue::TimestampMicros(*v)),
            Datum::Str(text) => chrono::DateTime::parse_from_rfc3339(text)
                .map(|ts| CellValue::TimestampMicros(ts.timestamp_micros()))
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        PrimKind::Uuid => match datum {
            Datum::Uuid(v) => Ok(CellValue::Text(v.to_string())),
            Datum::Str(v) => uuid::Uuid::from_str(v)
                .map(|parsed| CellValue::Text(parsed.to_string()))
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
    }
}

fn shape_decimal(datum: &Datum, scale: u32) -> Result<CellValue, BadRow> {
    let rendered = match datum {
        Datum::Decimal(v) => v.with_scale(i64::from(scale)).to_string(),
        Datum::F64(v) => BigDecimal::try_from(*v)
            .map_err(|_| BadRow(format!("{v} is not a finite decimal")))?
            .with_scale(i64::from(scale))
            .to_string(),
        Datum::I32(v) => BigDecimal::from(*v).with_scale(i64::from(scale)).to_string(),
        Datum::I64(v) => BigDecimal::from(*v).with_scale(i64::from(scale)).to_string(),
        Datum::Str(v) => BigDecimal::from_str(v)
            .map_err(|_| BadRow(format!("{v:?} is not a decimal")))?
            .with_scale(i64::from(scale))
            .to_string(),
        other => return Err(BadRow(format!("expected decimal, decoded {other:?}"))),
    };
    Ok(CellValue::Text(rendered))
}

fn as_i64(datum: &Datum) -> Option<i64> {
    match datum {
        Datum::I32(v) => Some(i64::from(*v)),
        Datum::I64(v) => Some(*v),
        Datum::U32(v) => Some(i64::from(*v)),
        Datum::U64(v) => i64::try_from(*v).ok(),
        _ => None,
    }
}

fn as_u64(datum: &Datum) -> Option<u64> {
    match datum {
        Datum::U32(v) => Some(u64::from(*v)),
        Datum::U64(v) => Some(*v),
        Datum::I32(v) => u64::try_from(*v).ok(),
        Datum::I64(v) => u64::try_from(*v).ok(),
        _ => None,
    }
}

/// Render a composite value as DuckDB literal text in the form the
/// engine's VARCHAR-to-nested cast parses.
fn render_literal(datum: &Datum, column: &Column) -> Result<String, BadRow> {
    match &column.ty {
        ColumnType::List(item) => {
            let items = match datum {
                Datum::List(items) => items,
                other => return Err(BadRow(format!("expected a list, decoded {other:?}"))),
            };
            let rendered: Result<Vec<String>, BadRow> = items
                .iter()
                .map(|entry| render_value(entry, item))
                .collect();
            Ok(format!("[{}]", rendered?.join(", ")))
        }
        ColumnType::Map(key, value) => {
            let pairs = match datum {
                Datum::Map(pairs) => pairs,
                other => return Err(BadRow(format!("expected a map, decoded {other:?}"))),
            };
            let mut rendered = Vec::with_capacity(pairs.len());
            for (entry_key, entry_value) in pairs {
                rendered.push(format!(
                    "{}={}",
                    render_value(entry_key, key)?,
                    render_value(entry_value, value)?
                ));
            }
            Ok(format!("{{{}}}", rendered.join(", ")))
        }
        ColumnType::Struct(fields) => {
            let decoded = match datum {
                Datum::Struct(decoded) => decoded,
                other => return Err(BadRow(format!("expected a struct, decoded {other:?}"))),
            };
            let mut rendered = Vec::with_capacity(fields.len());
            for (name, field_column) in fields {
                let field = decoded
                    .iter()
                    .find(|(decoded_name, _)| decoded_name == name)
                    .map(|(_, field_datum)| field_datum);
                let text = match field {
                    Some(field_datum) => render_value(field_datum, field_column)?,
                    None if field_column.is_nullable() => "NULL".to_string(),
                    None => return Err(BadRow(format!("missing required field {name:?}"))),
                };
                rendered.push(format!("'{}': {}", name.replace('\'', "''"), text));
            }
            Ok(format!("{{{}}}", rendered.join(", ")))
        }
        _ => render_value(datum, column),
    }
}

fn render_value(datum: &Datum, column: &Column) -> Result<String, BadRow> {
    match &column.ty {
        ColumnType::List(_) | ColumnType::Map(_, _) | ColumnType::Struct(_) => {
            if datum.is_null() {
                if column.is_nullable() {
                    return Ok("NULL".to_string());
                }
                return Err(BadRow("null value for a required column".to_string()));
            }
            render_literal(datum, column)
        }
        ColumnType::Union(_) => match shape(datum, column)? {
            CellValue::Null => Ok("NULL".to_string()),
            CellValue::Text(text) => Ok(text),
            other => Ok(cell_literal(&other)),
        },
        _ => Ok(cell_literal(&shape(datum, column)?)),
    }
}

fn cell_literal(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => "NULL".to_string(),
        CellValue::Bool(v) => if *v { "true" } else { "false" }.to_string(),
        CellValue::I8(v) => v.to_string(),
        CellValue::I16(v) => v.to_string(),
        CellValue::I32(v) => v.to_string(),
        CellValue::I64(v) => v.to_string(),
        CellValue::U8(v) => v.to_string(),
        CellValue::U16(v) => v.to_string(),
        CellValue::U32(v) => v.to_string(),
        CellValue::U64(v) => v.to_string(),
        CellValue::F32(v) => v.to_string(),
        CellValue::F64(v) => v.to_string(),
        CellValue::Text(v) => format!("'{}'", v.replace('\'', "''")),
        CellValue::Blob(v) => {
            let mut out = String::with_capacity(v.len() * 4 + 2);
            out.push('\'');
            for byte in v {
                out.push_str(&format!("\\x{byte:02X}"));
            }
            out.push('\'');
            out
        }
        CellValue::Date(days) => {
            let date = NaiveDate::from_ymd_opt(1970, 1, 1)
                .unwrap()
                .checked_add_signed(chrono::Duration::days(i64::from(*days)))
                .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
            format!("'{}'", date.format("%Y-%m-%d"))
        }
        CellValue::TimestampMicros(v) => match chrono::DateTime::from_timestamp_micros(*v) {
            Some(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.6f")),
            None => "NULL".to_string(),
        },
    }
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    (date - epoch).num_days() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use kawai_core::Nullability;

    fn struct_col(fields: Vec<(&str, Column)>) -> Column {
        Column::new(ColumnType::Struct(
            fields.into_iter().map(|(n, c)| (n.to_string(), c)).collect(),
        ))
        .unwrap()
    }

    fn key_col() -> Column {
        Column::prim(PrimKind::Bytes).nullable()
    }

    #[test]
    fn struct_value_flattens_after_key() {
        let value_column = struct_col(vec![
            ("a", Column::prim(PrimKind::I32)),
            ("b", Column::prim(PrimKind::Utf8)),
        ]);
        let value = Datum::Struct(vec![
            ("a".to_string(), Datum::I32(7)),
            ("b".to_string(), Datum::Str("x".to_string())),
        ]);
        let row = shape_row(&Datum::Null, &key_col(), &value, &value_column).unwrap();
        assert_eq!(
            row,
            vec![
                CellValue::Null,
                CellValue::I32(7),
                CellValue::Text("x".to_string())
            ]
        );
    }

    #[test]
    fn scalar_value_is_single_cell() {
        let row = shape_row(
            &Datum::Null,
            &key_col(),
            &Datum::Bytes(vec![0xde, 0xad]),
            &Column::prim(PrimKind::Bytes).nullable(),
        )
        .unwrap();
        assert_eq!(row, vec![CellValue::Null, CellValue::Blob(vec![0xde, 0xad])]);

        // A tombstone nulls the value cell even for a required column.
        let tombstone = shape_row(
            &Datum::Null,
            &key_col(),
            &Datum::Null,
            &Column::prim(PrimKind::I64),
        )
        .unwrap();
        assert_eq!(tombstone, vec![CellValue::Null, CellValue::Null]);
    }

    #[test]
    fn tombstone_yields_all_null_value_cells() {
        let value_column = struct_col(vec![
            ("a", Column::prim(PrimKind::I32)),
            ("b", Column::prim(PrimKind::Utf8)),
        ]);
        let row = shape_row(
            &Datum::Bytes(b"k".to_vec()),
            &key_col(),
            &Datum::Null,
            &value_column,
        )
        .unwrap();
        assert_eq!(
            row,
            vec![
                CellValue::Blob(b"k".to_vec()),
                CellValue::Null,
                CellValue::Null
            ]
        );
    }

    #[test]
    fn missing_fields_follow_nullability() {
        let value_column = struct_col(vec![
            ("a", Column::prim(PrimKind::I32)),
            ("b", Column::prim(PrimKind::Utf8).nullable()),
        ]);
        let present_only_a = Datum::Struct(vec![("a".to_string(), Datum::I32(1))]);
        let row = shape_row(&Datum::Null, &key_col(), &present_only_a, &value_column).unwrap();
        assert_eq!(row[2], CellValue::Null);

        let missing_required = Datum::Struct(vec![("b".to_string(), Datum::Str("x".into()))]);
        assert!(shape_row(&Datum::Null, &key_col(), &missing_required, &value_column).is_err());
    }

    #[test]
    fn empty_list_is_empty_not_null() {
        let column = Column::new(ColumnType::List(Box::new(Column::prim(PrimKind::I32)))).unwrap();
        let cell = shape(&Datum::List(vec![]), &column).unwrap();
        assert_eq!(cell, CellValue::Text("[]".to_string()));
    }

    #[test]
    fn composite_cells_render_duckdb_literals() {
        let list = Column::new(ColumnType::List(Box::new(Column::prim(PrimKind::I32)))).unwrap();
        assert_eq!(
            shape(&Datum::List(vec![Datum::I32(1), Datum::I32(2)]), &list).unwrap(),
            CellValue::Text("[1, 2]".to_string())
        );

        let nested = Column::new(ColumnType::Struct(vec![(
            "name".to_string(),
            Column::prim(PrimKind::Utf8),
        )]))
        .unwrap();
        let inner = Datum::Struct(vec![("name".to_string(), Datum::Str("o'hare".into()))]);
        assert_eq!(
            shape(&inner, &nested).unwrap(),
            CellValue::Text("{'name': 'o''hare'}".to_string())
        );

        let map = Column::new(ColumnType::Map(
            Box::new(Column::prim(PrimKind::Utf8)),
            Box::new(Column::prim(PrimKind::I64)),
        ))
        .unwrap();
        let pairs = Datum::Map(vec![(Datum::Str("a".into()), Datum::I64(1))]);
        assert_eq!(
            shape(&pairs, &map).unwrap(),
            CellValue::Text("{'a'=1}".to_string())
        );
    }

    #[test]
    fn union_tags_are_checked() {
        let column = Column::new(ColumnType::Union(vec![
            ("int".to_string(), Column::prim(PrimKind::I32)),
            ("string".to_string(), Column::prim(PrimKind::Utf8)),
        ]))
        .unwrap()
        .nullable();

        let tagged = Datum::Union {
            tag: Some("string".to_string()),
            value: Box::new(Datum::Str("hi".to_string())),
        };
        assert_eq!(
            shape(&tagged, &column).unwrap(),
            CellValue::Text("'hi'".to_string())
        );

        let unknown = Datum::Union {
            tag: Some("float".to_string()),
            value: Box::new(Datum::F32(1.0)),
        };
        assert!(shape(&unknown, &column).is_err());

        assert_eq!(shape(&Datum::Null, &column).unwrap(), CellValue::Null);
    }

    #[test]
    fn collapsed_union_sheds_its_wrapper() {
        let column = Column::prim(PrimKind::Utf8).nullable();
        let datum = Datum::Union {
            tag: Some("string".to_string()),
            value: Box::new(Datum::Str("hi".to_string())),
        };
        assert_eq!(
            shape(&datum, &column).unwrap(),
            CellValue::Text("hi".to_string())
        );
    }

    #[test]
    fn decimal_keeps_exact_scale() {
        let column = Column::new(ColumnType::Decimal {
            precision: 10,
            scale: 2,
        })
        .unwrap();
        let cell = shape(
            &Datum::Decimal(BigDecimal::from_str("123.45").unwrap()),
            &column,
        )
        .unwrap();
        assert_eq!(cell, CellValue::Text("123.45".to_string()));
    }

    #[test]
    fn default_columns_accept_missing_values() {
        let mut with_default = Column::prim(PrimKind::I32);
        with_default.null = Nullability::Default("42".to_string());
        let value_column = struct_col(vec![
            ("a", Column::prim(PrimKind::I32)),
            ("d", with_default),
        ]);
        let value = Datum::Struct(vec![("a".to_string(), Datum::I32(1))]);
        let row = shape_row(&Datum::Null, &key_col(), &value, &value_column).unwrap();
        assert_eq!(row[2], CellValue::Null);
    }
}
