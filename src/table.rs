// src/table.rs
// Table identifiers and source column descriptors.

use crate::error::{ReplicationError, Result, classify_pg_error};
use postgres::GenericClient;
use std::fmt;
use std::str::FromStr;

/// A table addressed by schema and name. Source and target use the same identifiers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Table {
    pub schema: String,
    pub name: String,
}

impl FromStr for Table {
    type Err = ReplicationError;
    fn from_str(s: &str) -> Result<Self> {
        let (schema, name) = s.split_once('.').unwrap_or(("public", s));
        if schema.is_empty() || name.is_empty() {
            return Err(ReplicationError::Configuration(format!(
                "invalid table reference: {:?}",
                s
            )));
        }
        Ok(Table::new(schema, name))
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

impl Table {
    pub fn new(schema: &str, name: &str) -> Self {
        Table {
            schema: schema.to_string(),
            name: name.to_string(),
        }
    }

    /// Fully qualified, quoted name for use in generated SQL.
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    /// Reads the column layout of this table, in ordinal order. An empty result means
    /// the table does not exist (or is not visible to the connected role).
    pub fn get_columns<C: GenericClient>(&self, client: &mut C) -> Result<Vec<ColumnDescriptor>> {
        let rows = client
            .query(
                "SELECT column_name::text, data_type::text, character_maximum_length::int4, is_nullable::text
                 FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&self.schema, &self.name],
            )
            .map_err(|e| classify_pg_error(e, ReplicationError::Extraction))?;
        Ok(rows
            .iter()
            .map(|row| ColumnDescriptor {
                name: row.get(0),
                source_type: row.get(1),
                max_length: row.get::<_, Option<i32>>(2).map(|n| n as i64),
                nullable: row.get::<_, String>(3) == "YES",
            })
            .collect())
    }

    /// Primary key columns in key order; empty when the table has no primary key.
    pub fn get_primary_key<C: GenericClient>(&self, client: &mut C) -> Result<Vec<String>> {
        let rows = client
            .query(
                "SELECT a.attname::text
                 FROM pg_index i
                 JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
                 WHERE i.indrelid = ($1)::text::regclass AND i.indisprimary
                 ORDER BY array_position(i.indkey::int2[], a.attnum)",
                &[&self.quoted()],
            )
            .map_err(|e| classify_pg_error(e, ReplicationError::Extraction))?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }
}

/// One source column as reported by schema introspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub source_type: String,
    pub max_length: Option<i64>,
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn new(name: &str, source_type: &str) -> Self {
        ColumnDescriptor {
            name: name.to_string(),
            source_type: source_type.to_string(),
            max_length: None,
            nullable: true,
        }
    }

    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Escapes an identifier by doubling embedded double quotes and wraps it in quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
