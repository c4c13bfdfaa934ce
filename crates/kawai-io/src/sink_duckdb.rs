//! DuckDB table management.
//!
//! One table per topic, created on the topic's first record. The table
//! DDL and the prepared insert's arity both derive from the flattened
//! column definitions, never from a constant.

use duckdb::Connection;
use kawai_core::column::quote_ident;
use kawai_core::{Column, ColumnType, Nullability, SinkError};
use kawai_tx::CellValue;
use tracing::info;

/// A created-or-verified topic table and its prepared insert.
pub struct TopicTable {
    table: String,
    insert_sql: String,
    arity: usize,
}

impl TopicTable {
    /// Create the table for `topic` if it does not exist and compile its
    /// insert statement. The key occupies a single column named `key`;
    /// the value contributes one column per flattened field.
    pub fn create(
        conn: &Connection,
        topic: &str,
        key_column: &Column,
        value_column: &Column,
    ) -> Result<TopicTable, SinkError> {
        let ddl_error = |message: String| SinkError::Ddl {
            table: topic.to_string(),
            message,
        };

        let value_columns = value_column
            .flatten_top_level()
            .map_err(|e| ddl_error(e.to_string()))?;
        if value_columns.iter().any(|(name, _)| name == "key") {
            return Err(SinkError::Collision {
                table: topic.to_string(),
                column: "key".to_string(),
            });
        }

        let mut columns: Vec<(String, Column)> = vec![("key".to_string(), key_column.clone())];
        columns.extend(value_columns);

        let rendered: Vec<String> = columns
            .iter()
            .map(|(name, column)| {
                let mut ddl = format!("{} {}", quote_ident(name), column.render_ddl());
                if let Nullability::Default(expr) = &column.null {
                    ddl.push_str(" DEFAULT ");
                    ddl.push_str(expr);
                }
                ddl
            })
            .collect();
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(topic),
            rendered.join(", ")
        );
        conn.execute_batch(&create)
            .map_err(|e| ddl_error(e.to_string()))?;

        let placeholders: Vec<String> = columns
            .iter()
            .map(|(_, column)| placeholder(column))
            .collect();
        let insert_sql = format!(
            "INSERT INTO {} VALUES ({})",
            quote_ident(topic),
            placeholders.join(", ")
        );
        // Compile once now so a bad statement fails at table creation,
        // not at the first record.
        conn.prepare_cached(&insert_sql)
            .map_err(|e| ddl_error(e.to_string()))?;

        info!(topic, arity = columns.len(), "table ready");
        Ok(TopicTable {
            table: topic.to_string(),
            insert_sql,
            arity: columns.len(),
        })
    }

    /// Execute the prepared insert for one positional row.
    pub fn insert(&self, conn: &Connection, row: &[CellValue]) -> Result<(), SinkError> {
        let insert_error = |message: String| SinkError::Insert {
            table: self.table.clone(),
            message,
        };
        if row.len() != self.arity {
            return Err(insert_error(format!(
                "row arity {} does not match table arity {}",
                row.len(),
                self.arity
            )));
        }
        let mut statement = conn
            .prepare_cached(&self.insert_sql)
            .map_err(|e| insert_error(e.to_string()))?;
        statement
            .execute(duckdb::params_from_iter(row.iter()))
            .map_err(|e| insert_error(e.to_string()))?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.table
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

/// Composite and exact-numeric cells travel as text; wrap their
/// placeholders in explicit casts to the column type.
fn placeholder(column: &Column) -> String {
    match &column.ty {
        ColumnType::List(_)
        | ColumnType::Map(_, _)
        | ColumnType::Struct(_)
        | ColumnType::Union(_)
        | ColumnType::Enum { .. }
        | ColumnType::Decimal { .. } => format!("CAST(? AS {})", column.render_ddl()),
        _ => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kawai_core::PrimKind;

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
    fn struct_value_flattens_into_columns() {
        let conn = Connection::open_in_memory().unwrap();
        let value = struct_col(vec![
            ("a", Column::prim(PrimKind::I32)),
            ("b", Column::prim(PrimKind::Utf8).nullable()),
        ]);
        let table = TopicTable::create(&conn, "t2", &key_col(), &value).unwrap();
        assert_eq!(table.arity(), 3);

        table
            .insert(
                &conn,
                &[
                    CellValue::Null,
                    CellValue::I32(7),
                    CellValue::Text("x".to_string()),
                ],
            )
            .unwrap();

        let (a, b): (i32, String) = conn
            .query_row(r#"SELECT "a", "b" FROM "t2""#, [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!((a, b.as_str()), (7, "x"));
    }

    #[test]
    fn non_struct_value_is_single_column() {
        let conn = Connection::open_in_memory().unwrap();
        let value = Column::prim(PrimKind::Bytes).nullable();
        let table = TopicTable::create(&conn, "t3", &key_col(), &value).unwrap();
        assert_eq!(table.arity(), 2);

        table
            .insert(&conn, &[CellValue::Null, CellValue::Blob(vec![0xde, 0xad])])
            .unwrap();
        let blob: Vec<u8> = conn
            .query_row(r#"SELECT "value" FROM "t3""#, [], |row| row.get(0))
            .unwrap();
        assert_eq!(blob, vec![0xde, 0xad]);
    }

    #[test]
    fn create_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let value = struct_col(vec![("a", Column::prim(PrimKind::I64))]);
        TopicTable::create(&conn, "t", &key_col(), &value).unwrap();
        TopicTable::create(&conn, "t", &key_col(), &value).unwrap();
    }

    #[test]
    fn value_field_named_key_collides() {
        let conn = Connection::open_in_memory().unwrap();
        let value = struct_col(vec![("key", Column::prim(PrimKind::I64))]);
        assert!(matches!(
            TopicTable::create(&conn, "t", &key_col(), &value),
            Err(SinkError::Collision { .. })
        ));
    }

    #[test]
    fn decimal_and_composite_cells_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        let value = struct_col(vec![
            (
                "price",
                Column::new(ColumnType::Decimal {
                    precision: 10,
                    scale: 2,
                })
                .unwrap(),
            ),
            (
                "tags",
                Column::new(ColumnType::List(Box::new(Column::prim(PrimKind::Utf8)))).unwrap(),
            ),
        ]);
        let table = TopicTable::create(&conn, "t5", &key_col(), &value).unwrap();

        table
            .insert(
                &conn,
                &[
                    CellValue::Null,
                    CellValue::Text("123.45".to_string()),
                    CellValue::Text("['a', 'b']".to_string()),
                ],
            )
            .unwrap();

        let (price, tag_count): (String, i64) = conn
            .query_row(
                r#"SELECT CAST("price" AS VARCHAR), len("tags") FROM "t5""#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(price, "123.45");
        assert_eq!(tag_count, 2);
    }

    #[test]
    fn tombstone_rows_insert_all_nulls() {
        let conn = Connection::open_in_memory().unwrap();
        let value = struct_col(vec![("a", Column::prim(PrimKind::I32))]);
        let table = TopicTable::create(&conn, "t", &key_col(), &value).unwrap();
        table
            .insert(&conn, &[CellValue::Blob(b"k".to_vec()), CellValue::Null])
            .unwrap();
        let nulls: i64 = conn
            .query_row(r#"SELECT count(*) FROM "t" WHERE "a" IS NULL"#, [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(nulls, 1);
    }
}
