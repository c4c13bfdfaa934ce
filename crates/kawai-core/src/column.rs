//! Recursive column model and its DuckDB DDL rendering.
//!
//! A [`Column`] describes one relational column: a primitive, a decimal,
//! a fixed-width byte string, an enum, or a composite built from other
//! columns. Translators produce a root `Column` per topic role and the
//! table manager renders it into `CREATE TABLE` DDL.

use crate::BadSchema;

/// Primitive column kinds, by exact width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Utf8,
    Bytes,
    Date,
    TimestampMicros,
    Uuid,
}

impl PrimKind {
    /// DuckDB type name for this primitive.
    pub fn ddl(&self) -> &'static str {
        match self {
            PrimKind::Bool => "BOOLEAN",
            PrimKind::I8 => "TINYINT",
            PrimKind::I16 => "SMALLINT",
            PrimKind::I32 => "INTEGER",
            PrimKind::I64 => "BIGINT",
            PrimKind::U8 => "UTINYINT",
            PrimKind::U16 => "USMALLINT",
            PrimKind::U32 => "UINTEGER",
            PrimKind::U64 => "UBIGINT",
            PrimKind::F32 => "FLOAT",
            PrimKind::F64 => "DOUBLE",
            PrimKind::Utf8 => "VARCHAR",
            PrimKind::Bytes => "BLOB",
            PrimKind::Date => "DATE",
            PrimKind::TimestampMicros => "TIMESTAMP",
            PrimKind::Uuid => "UUID",
        }
    }
}

/// How absence of a value is handled for a column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Nullability {
    /// A value is required; a missing field is a bad row.
    #[default]
    NotNull,
    /// A missing or null value materializes as SQL NULL.
    Null,
    /// A missing value falls back to the given SQL expression.
    Default(String),
}

/// The type half of a column definition.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Prim(PrimKind),
    Decimal { precision: u32, scale: u32 },
    Fixed(usize),
    Enum { name: String, symbols: Vec<String> },
    List(Box<Column>),
    Map(Box<Column>, Box<Column>),
    Struct(Vec<(String, Column)>),
    Union(Vec<(String, Column)>),
}

/// A typed, possibly composite column with its nullability strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub ty: ColumnType,
    pub null: Nullability,
}

impl Column {
    /// A required column of the given type, after shape validation.
    pub fn new(ty: ColumnType) -> Result<Self, BadSchema> {
        validate(&ty)?;
        Ok(Column {
            ty,
            null: Nullability::NotNull,
        })
    }

    /// Unchecked constructor for leaves that cannot be malformed.
    pub fn prim(kind: PrimKind) -> Self {
        Column {
            ty: ColumnType::Prim(kind),
            null: Nullability::NotNull,
        }
    }

    /// Same column with its nullability relaxed to NULL.
    pub fn nullable(mut self) -> Self {
        self.null = Nullability::Null;
        self
    }

    pub fn is_nullable(&self) -> bool {
        !matches!(self.null, Nullability::NotNull)
    }

    /// Render the type portion of this column in DuckDB's dialect.
    ///
    /// Nullability is not part of the type text: topics materialize
    /// tombstones as all-null rows, so table columns never carry engine
    /// NOT NULL constraints. `DEFAULT` expressions attach at the table
    /// level, next to the column name.
    pub fn render_ddl(&self) -> String {
        match &self.ty {
            ColumnType::Prim(kind) => kind.ddl().to_string(),
            ColumnType::Decimal { precision, scale } => {
                format!("DECIMAL({precision},{scale})")
            }
            ColumnType::Fixed(_) => "BLOB".to_string(),
            ColumnType::Enum { symbols, .. } => {
                let symbols: Vec<String> = symbols
                    .iter()
                    .map(|s| format!("'{}'", s.replace('\'', "''")))
                    .collect();
                format!("ENUM({})", symbols.join(", "))
            }
            ColumnType::List(item) => format!("{}[]", item.render_ddl()),
            ColumnType::Map(key, value) => {
                format!("MAP({}, {})", key.render_ddl(), value.render_ddl())
            }
            ColumnType::Struct(fields) => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|(name, col)| format!("{} {}", quote_ident(name), col.render_ddl()))
                    .collect();
                format!("STRUCT({})", fields.join(", "))
            }
            ColumnType::Union(branches) => {
                let branches: Vec<String> = branches
                    .iter()
                    .map(|(tag, col)| format!("{} {}", quote_ident(tag), col.render_ddl()))
                    .collect();
                format!("UNION({})", branches.join(", "))
            }
        }
    }

    /// The positional schema of a row with this column at the root.
    ///
    /// A root `Struct` contributes its fields verbatim; any other root
    /// contributes a single synthetic `value` field.
    pub fn flatten_top_level(&self) -> Result<Vec<(String, Column)>, BadSchema> {
        validate(&self.ty)?;
        match &self.ty {
            ColumnType::Struct(fields) => Ok(fields.clone()),
            _ => Ok(vec![("value".to_string(), self.clone())]),
        }
    }
}

/// Quote an identifier for DuckDB DDL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn validate(ty: &ColumnType) -> Result<(), BadSchema> {
    match ty {
        ColumnType::Prim(_) => Ok(()),
        ColumnType::Decimal { precision, scale } => {
            if *precision < 1 || *precision > 38 || scale > precision {
                return Err(BadSchema::BadDecimal {
                    precision: *precision,
                    scale: *scale,
                });
            }
            Ok(())
        }
        ColumnType::Fixed(_) => Ok(()),
        ColumnType::Enum { name, symbols } => {
            if symbols.is_empty() {
                return Err(BadSchema::EmptyEnum(name.clone()));
            }
            check_unique_names(&format!("enum {name:?}"), symbols.iter())?;
            Ok(())
        }
        ColumnType::List(item) => validate(&item.ty),
        ColumnType::Map(key, value) => {
            match &key.ty {
                ColumnType::Prim(PrimKind::Bytes) | ColumnType::Fixed(_) => {
                    return Err(BadSchema::BadMapKey(key.render_ddl()))
                }
                ColumnType::Prim(_) | ColumnType::Enum { .. } => {}
                other => {
                    return Err(BadSchema::BadMapKey(
                        Column {
                            ty: other.clone(),
                            null: Nullability::NotNull,
                        }
                        .render_ddl(),
                    ))
                }
            }
            validate(&key.ty)?;
            validate(&value.ty)
        }
        ColumnType::Struct(fields) => {
            if fields.is_empty() {
                return Err(BadSchema::EmptyStruct("struct".to_string()));
            }
            check_unique_names("struct", fields.iter().map(|(n, _)| n))?;
            for (_, col) in fields {
                validate(&col.ty)?;
            }
            Ok(())
        }
        ColumnType::Union(branches) => {
            if branches.is_empty() {
                return Err(BadSchema::EmptyStruct("union".to_string()));
            }
            check_unique_names("union", branches.iter().map(|(n, _)| n))?;
            for (_, col) in branches {
                validate(&col.ty)?;
            }
            Ok(())
        }
    }
}

fn check_unique_names<'a>(
    context: &str,
    names: impl Iterator<Item = &'a String>,
) -> Result<(), BadSchema> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(BadSchema::EmptyName(context.to_string()));
        }
        if !seen.insert(name.as_str()) {
            return Err(BadSchema::DuplicateName {
                context: context.to_string(),
                name: name.clone(),
            });
        }
    }
    Ok(())
}
