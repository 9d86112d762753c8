// src/type_map.rs
// Maps source (PostgreSQL) column types onto warehouse column definitions.

use crate::table::{ColumnDescriptor, quote_ident};
use std::fmt;

/// Warehouse column type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetType {
    SmallInt,
    Integer,
    BigInt,
    Numeric,
    Real,
    Double,
    /// Variable-length text. `None` is unbounded.
    Varchar(Option<u32>),
    Boolean,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    /// Semi-structured value (JSON documents).
    Super,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::SmallInt => write!(f, "SMALLINT"),
            TargetType::Integer => write!(f, "INTEGER"),
            TargetType::BigInt => write!(f, "BIGINT"),
            TargetType::Numeric => write!(f, "NUMERIC(38,10)"),
            TargetType::Real => write!(f, "REAL"),
            TargetType::Double => write!(f, "DOUBLE PRECISION"),
            TargetType::Varchar(Some(len)) => write!(f, "VARCHAR({})", len),
            TargetType::Varchar(None) => write!(f, "VARCHAR(MAX)"),
            TargetType::Boolean => write!(f, "BOOLEAN"),
            TargetType::Date => write!(f, "DATE"),
            TargetType::Time => write!(f, "TIME"),
            TargetType::Timestamp => write!(f, "TIMESTAMP"),
            TargetType::TimestampTz => write!(f, "TIMESTAMPTZ"),
            TargetType::Super => write!(f, "SUPER"),
        }
    }
}

/// Source type names (lower case) and the warehouse type they become.
const TYPE_MAP: &[(&str, TargetType)] = &[
    ("smallint", TargetType::SmallInt),
    ("integer", TargetType::Integer),
    ("bigint", TargetType::BigInt),
    ("numeric", TargetType::Numeric),
    ("decimal", TargetType::Numeric),
    ("real", TargetType::Real),
    ("double precision", TargetType::Double),
    ("character varying", TargetType::Varchar(None)),
    ("varchar", TargetType::Varchar(None)),
    ("character", TargetType::Varchar(None)),
    ("char", TargetType::Varchar(None)),
    ("text", TargetType::Varchar(None)),
    ("uuid", TargetType::Varchar(None)),
    ("boolean", TargetType::Boolean),
    ("date", TargetType::Date),
    ("time", TargetType::Time),
    ("time without time zone", TargetType::Time),
    ("timestamp without time zone", TargetType::Timestamp),
    ("timestamp with time zone", TargetType::TimestampTz),
    ("json", TargetType::Super),
    ("jsonb", TargetType::Super),
];

/// Anything not in the table lands in an unbounded text column.
const FALLBACK: TargetType = TargetType::Varchar(None);

/// Maps a single source type. Lookup is case-insensitive; unknown types fall back to
/// unbounded text. A positive `max_length` bounds text columns to exactly that length.
pub fn map_type(source_type: &str, max_length: Option<i64>) -> TargetType {
    let key = source_type.trim().to_lowercase();
    let mapped = TYPE_MAP
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, ty)| *ty)
        .unwrap_or(FALLBACK);
    match (mapped, max_length) {
        (TargetType::Varchar(_), Some(len)) if len > 0 => {
            TargetType::Varchar(Some(u32::try_from(len).unwrap_or(u32::MAX)))
        }
        (ty, _) => ty,
    }
}

/// A column of the warehouse table, ready to be rendered into DDL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetColumn {
    pub name: String,
    pub data_type: TargetType,
    pub nullable: bool,
}

impl TargetColumn {
    pub fn from_descriptor(column: &ColumnDescriptor) -> Self {
        TargetColumn {
            name: column.name.clone(),
            data_type: map_type(&column.source_type, column.max_length),
            nullable: column.nullable,
        }
    }

    /// `"name" TYPE NULL|NOT NULL`. Defaults are never carried over.
    pub fn definition(&self) -> String {
        let null = if self.nullable { "NULL" } else { "NOT NULL" };
        format!("{} {} {}", quote_ident(&self.name), self.data_type, null)
    }
}

pub fn map_columns(columns: &[ColumnDescriptor]) -> Vec<TargetColumn> {
    columns.iter().map(TargetColumn::from_descriptor).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(map_type("BIGINT", None), TargetType::BigInt);
        assert_eq!(
            map_type("Timestamp With Time Zone", None),
            TargetType::TimestampTz
        );
        assert_eq!(map_type("jsonb", None), TargetType::Super);
    }

    #[test]
    fn test_unknown_types_fall_back_to_text() {
        assert_eq!(map_type("tsvector", None), TargetType::Varchar(None));
        assert_eq!(map_type("USER-DEFINED", None).to_string(), "VARCHAR(MAX)");
    }

    #[test]
    fn test_text_length_is_carried_only_when_positive() {
        assert_eq!(
            map_type("character varying", Some(255)),
            TargetType::Varchar(Some(255))
        );
        assert_eq!(
            map_type("character varying", Some(0)),
            TargetType::Varchar(None)
        );
        assert_eq!(map_type("integer", Some(255)), TargetType::Integer);
    }

    #[test]
    fn test_definition_controls_nullability() {
        let id = ColumnDescriptor::new("id", "integer").not_null();
        let name = ColumnDescriptor::new("name", "varchar").with_max_length(64);
        let columns = map_columns(&[id, name]);
        assert_eq!(columns[0].definition(), "\"id\" INTEGER NOT NULL");
        assert_eq!(columns[1].definition(), "\"name\" VARCHAR(64) NULL");
    }
}
