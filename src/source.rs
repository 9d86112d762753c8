// src/source.rs
// Row extraction from the relational source.

use crate::batch::{Row, value_to_text};
use crate::error::{ReplicationError, Result, classify_pg_error};
use crate::table::{ColumnDescriptor, Table, quote_ident};
use itertools::Itertools;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::{PostgresConnectionManager, postgres::NoTls as R2d2NoTls};
use serde_json::Value;
use std::collections::HashMap;

pub type PgPool = Pool<PostgresConnectionManager<R2d2NoTls>>;
pub type PgConnection = PooledConnection<PostgresConnectionManager<R2d2NoTls>>;

/// Where the next batch starts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cursor<'a> {
    /// Skip this many rows in a stable order (primary key, else physical position).
    Offset(u64),
    /// Rows whose `column` is strictly greater than `watermark`, ascending by that column.
    /// Without a watermark the extraction starts at the lowest value.
    After {
        column: &'a ColumnDescriptor,
        watermark: Option<&'a Value>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtractRequest<'a> {
    pub table: &'a Table,
    pub batch_size: usize,
    pub cursor: Cursor<'a>,
}

pub trait SourceExtractor {
    /// Column layout in ordinal order; empty when the table does not exist.
    fn describe_table(&mut self, table: &Table) -> Result<Vec<ColumnDescriptor>>;
    /// At most `batch_size` rows starting at the request's cursor.
    fn extract(&mut self, request: &ExtractRequest<'_>) -> Result<Vec<Row>>;
}

/// Source types that cannot be named in a cast. Their values are compared as text.
const UNCASTABLE: &[&str] = &["USER-DEFINED", "ARRAY"];

/// Builds the extraction query and its text parameters. Offset pages are ordered by
/// `key_columns`, or by `ctid` when the table has no primary key.
pub fn extract_statement(
    request: &ExtractRequest<'_>,
    key_columns: &[String],
) -> (String, Vec<Option<String>>) {
    let limit = request.batch_size.to_string();
    let from = format!("SELECT row_to_json(t)::text FROM {} AS t", request.table.quoted());
    match request.cursor {
        Cursor::Offset(offset) => {
            let order = if key_columns.is_empty() {
                "t.ctid".to_string()
            } else {
                key_columns
                    .iter()
                    .map(|c| format!("t.{}", quote_ident(c)))
                    .join(", ")
            };
            (
                format!(
                    "{} ORDER BY {} LIMIT $1::text::bigint OFFSET $2::text::bigint",
                    from, order
                ),
                vec![Some(limit), Some(offset.to_string())],
            )
        }
        Cursor::After { column, watermark } => {
            let ident = format!("t.{}", quote_ident(&column.name));
            match watermark.and_then(value_to_text) {
                Some(watermark) => {
                    let filter = if UNCASTABLE.contains(&column.source_type.as_str()) {
                        format!("{}::text > $1::text", ident)
                    } else {
                        format!("{} > CAST($1::text AS {})", ident, column.source_type)
                    };
                    (
                        format!(
                            "{} WHERE {} ORDER BY {} ASC LIMIT $2::text::bigint",
                            from, filter, ident
                        ),
                        vec![Some(watermark), Some(limit)],
                    )
                }
                None => (
                    format!("{} ORDER BY {} ASC LIMIT $1::text::bigint", from, ident),
                    vec![Some(limit)],
                ),
            }
        }
    }
}

/// PostgreSQL source. Holds one pooled connection for the lifetime of a job; the
/// connection goes back to the pool when the source is dropped.
pub struct PostgresSource {
    client: PgConnection,
    primary_keys: HashMap<Table, Vec<String>>,
}

impl PostgresSource {
    pub fn new(client: PgConnection) -> Self {
        PostgresSource {
            client,
            primary_keys: HashMap::new(),
        }
    }

    pub fn from_pool(pool: &PgPool) -> Result<Self> {
        Ok(PostgresSource::new(pool.get()?))
    }

    fn key_columns(&mut self, table: &Table) -> Result<Vec<String>> {
        if let Some(key) = self.primary_keys.get(table) {
            return Ok(key.clone());
        }
        let key = table.get_primary_key(&mut *self.client)?;
        if key.is_empty() {
            tracing::warn!(%table, "no primary key; paging by physical row position");
        }
        self.primary_keys.insert(table.clone(), key.clone());
        Ok(key)
    }
}

impl SourceExtractor for PostgresSource {
    fn describe_table(&mut self, table: &Table) -> Result<Vec<ColumnDescriptor>> {
        table.get_columns(&mut *self.client)
    }

    fn extract(&mut self, request: &ExtractRequest<'_>) -> Result<Vec<Row>> {
        let key_columns = match request.cursor {
            Cursor::Offset(_) => self.key_columns(request.table)?,
            Cursor::After { .. } => Vec::new(),
        };
        let (sql, params) = extract_statement(request, &key_columns);
        let params: Vec<&(dyn postgres::types::ToSql + Sync)> = params
            .iter()
            .map(|p| p as &(dyn postgres::types::ToSql + Sync))
            .collect();
        let rows = self
            .client
            .query(sql.as_str(), &params)
            .map_err(|e| classify_pg_error(e, ReplicationError::Extraction))?;
        rows.iter()
            .map(|row| {
                let json: String = row.get(0);
                serde_json::from_str::<Row>(&json).map_err(|e| {
                    ReplicationError::Extraction(format!("malformed row from {}: {}", request.table, e))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_mode_pages_by_offset_in_key_order() {
        let table = Table::new("public", "orders");
        let request = ExtractRequest {
            table: &table,
            batch_size: 2,
            cursor: Cursor::Offset(4),
        };
        let (sql, params) = extract_statement(&request, &["region".into(), "id".into()]);
        assert_eq!(
            sql,
            "SELECT row_to_json(t)::text FROM \"public\".\"orders\" AS t \
             ORDER BY t.\"region\", t.\"id\" LIMIT $1::text::bigint OFFSET $2::text::bigint"
        );
        assert_eq!(params, vec![Some("2".to_string()), Some("4".to_string())]);

        let (sql, _) = extract_statement(&request, &[]);
        assert!(sql.contains("ORDER BY t.ctid LIMIT"));
    }

    #[test]
    fn test_incremental_filters_strictly_after_watermark() {
        let table = Table::new("public", "orders");
        let column = ColumnDescriptor::new("updated_at", "timestamp without time zone");
        let watermark = json!("2024-01-01T00:00:00");
        let after = ExtractRequest {
            table: &table,
            batch_size: 100,
            cursor: Cursor::After {
                column: &column,
                watermark: Some(&watermark),
            },
        };
        let (sql, params) = extract_statement(&after, &[]);
        assert!(sql.contains(
            "WHERE t.\"updated_at\" > CAST($1::text AS timestamp without time zone) ORDER BY t.\"updated_at\" ASC"
        ));
        assert_eq!(params[0].as_deref(), Some("2024-01-01T00:00:00"));

        let from_start = ExtractRequest {
            table: &table,
            batch_size: 100,
            cursor: Cursor::After {
                column: &column,
                watermark: None,
            },
        };
        let (sql, params) = extract_statement(&from_start, &["id".into()]);
        assert!(!sql.contains("WHERE"));
        assert!(sql.contains("ORDER BY t.\"updated_at\" ASC"));
        assert_eq!(params.len(), 1);
    }
}
