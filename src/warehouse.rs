// src/warehouse.rs
// Target table management and the two load paths.

use crate::batch::{Row, value_to_text};
use crate::codec::FileFormat;
use crate::config::OnError;
use crate::error::{ReplicationError, Result, classify_pg_error};
use crate::source::{PgConnection, PgPool};
use crate::staging::StagedFileRef;
use crate::table::{Table, quote_ident};
use crate::type_map::{TargetColumn, TargetType};
use itertools::Itertools;
use std::collections::HashMap;

/// Bind parameters allowed in one statement by the wire protocol.
const MAX_BIND_PARAMS: usize = 65_535;

/// Highest `MAXERROR` the warehouse accepts.
const MAX_COPY_ERRORS: u32 = 100_000;

pub trait TargetLoader {
    /// Creates the table when absent. Never drops or alters an existing table.
    fn ensure_table(&mut self, table: &Table, columns: &[TargetColumn]) -> Result<()>;
    fn truncate(&mut self, table: &Table) -> Result<()>;
    /// Inserts every row or none. Returns the inserted count, always `rows.len()`.
    fn load_direct(&mut self, table: &Table, rows: &[Row], truncate_first: bool) -> Result<u64>;
    /// Bulk-loads one staged file and returns the rows actually written.
    fn load_from_stage(&mut self, table: &Table, file: &StagedFileRef, on_error: OnError)
    -> Result<u64>;
}

pub fn create_table_statement(table: &Table, columns: &[TargetColumn]) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table.quoted(),
        columns.iter().map(TargetColumn::definition).join(", ")
    )
}

fn placeholder(n: usize, data_type: Option<TargetType>) -> String {
    match data_type {
        Some(TargetType::Super) => format!("JSON_PARSE(${}::varchar)", n),
        Some(ty) => format!("CAST(${}::varchar AS {})", n, ty),
        None => format!("${}", n),
    }
}

/// Multi-row insert for `row_count` rows over `columns`, with parameters numbered row
/// by row.
pub fn insert_statement(
    table: &Table,
    columns: &[(String, Option<TargetType>)],
    row_count: usize,
) -> String {
    let names = columns.iter().map(|(name, _)| quote_ident(name)).join(", ");
    let values = (0..row_count)
        .map(|r| {
            let cells = columns
                .iter()
                .enumerate()
                .map(|(c, (_, ty))| placeholder(r * columns.len() + c + 1, *ty))
                .join(", ");
            format!("({})", cells)
        })
        .join(", ");
    format!("INSERT INTO {} ({}) VALUES {}", table.quoted(), names, values)
}

/// Text parameters for `rows`, row by row in `columns` order. Absent values bind null.
pub fn row_params(rows: &[Row], columns: &[(String, Option<TargetType>)]) -> Vec<Option<String>> {
    rows.iter()
        .flat_map(|row| {
            columns
                .iter()
                .map(move |(name, _)| row.get(name).and_then(value_to_text))
        })
        .collect()
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

pub fn copy_statement(
    table: &Table,
    file: &StagedFileRef,
    iam_role: Option<&str>,
    on_error: OnError,
) -> String {
    let mut sql = format!("COPY {} FROM {}", table.quoted(), quote_literal(&file.uri));
    if let Some(role) = iam_role {
        sql.push_str(&format!(" IAM_ROLE {}", quote_literal(role)));
    }
    match file.format {
        FileFormat::Csv => {
            let max_errors = match on_error {
                OnError::Abort => 0,
                OnError::Continue => MAX_COPY_ERRORS,
            };
            // Source timestamps are ISO 8601 with a 'T' separator and optional offset.
            sql.push_str(&format!(
                " FORMAT AS CSV IGNOREHEADER 1 EMPTYASNULL TIMEFORMAT 'auto' DATEFORMAT 'auto' MAXERROR {}",
                max_errors
            ));
        }
        // Columnar loads have no per-row error tolerance.
        FileFormat::Parquet => sql.push_str(" FORMAT AS PARQUET"),
    }
    sql
}

/// Warehouse reached over the PostgreSQL wire protocol, Redshift dialect.
pub struct RedshiftLoader {
    client: PgConnection,
    iam_role: Option<String>,
    columns: HashMap<Table, Vec<TargetColumn>>,
}

impl RedshiftLoader {
    pub fn new(client: PgConnection) -> Self {
        RedshiftLoader {
            client,
            iam_role: None,
            columns: HashMap::new(),
        }
    }

    pub fn from_pool(pool: &PgPool) -> Result<Self> {
        Ok(RedshiftLoader::new(pool.get()?))
    }

    /// Role the warehouse assumes to read staged files.
    pub fn with_iam_role(mut self, role: &str) -> Self {
        self.iam_role = Some(role.to_string());
        self
    }

    fn insert_columns(&self, table: &Table, rows: &[Row]) -> Vec<(String, Option<TargetType>)> {
        match self.columns.get(table) {
            Some(columns) => columns
                .iter()
                .map(|c| (c.name.clone(), Some(c.data_type)))
                .collect(),
            None => rows
                .first()
                .map(|row| row.keys().map(|k| (k.clone(), None)).collect())
                .unwrap_or_default(),
        }
    }
}

impl TargetLoader for RedshiftLoader {
    fn ensure_table(&mut self, table: &Table, columns: &[TargetColumn]) -> Result<()> {
        let sql = create_table_statement(table, columns);
        tracing::debug!(%table, sql, "ensuring target table");
        self.client
            .batch_execute(&sql)
            .map_err(|e| classify_pg_error(e, ReplicationError::Load))?;
        self.columns.insert(table.clone(), columns.to_vec());
        Ok(())
    }

    fn truncate(&mut self, table: &Table) -> Result<()> {
        tracing::info!(%table, "truncating target table");
        self.client
            .batch_execute(&format!("TRUNCATE TABLE {}", table.quoted()))
            .map_err(|e| classify_pg_error(e, ReplicationError::Load))
    }

    fn load_direct(&mut self, table: &Table, rows: &[Row], truncate_first: bool) -> Result<u64> {
        let columns = self.insert_columns(table, rows);
        let mut tx = self
            .client
            .transaction()
            .map_err(|e| classify_pg_error(e, ReplicationError::Load))?;
        if truncate_first {
            tx.batch_execute(&format!("TRUNCATE TABLE {}", table.quoted()))
                .map_err(|e| classify_pg_error(e, ReplicationError::Load))?;
        }
        if rows.is_empty() || columns.is_empty() {
            tx.commit()
                .map_err(|e| classify_pg_error(e, ReplicationError::Load))?;
            return Ok(0);
        }
        let rows_per_statement = (MAX_BIND_PARAMS / columns.len()).max(1);
        let mut inserted = 0;
        for chunk in rows.chunks(rows_per_statement) {
            let sql = insert_statement(table, &columns, chunk.len());
            let params = row_params(chunk, &columns);
            let params: Vec<&(dyn postgres::types::ToSql + Sync)> = params
                .iter()
                .map(|p| p as &(dyn postgres::types::ToSql + Sync))
                .collect();
            inserted += tx
                .execute(sql.as_str(), &params)
                .map_err(|e| classify_pg_error(e, ReplicationError::Load))?;
        }
        if inserted != rows.len() as u64 {
            return Err(ReplicationError::Load(format!(
                "inserted {} of {} rows into {}",
                inserted,
                rows.len(),
                table
            )));
        }
        tx.commit()
            .map_err(|e| classify_pg_error(e, ReplicationError::Load))?;
        Ok(inserted)
    }

    fn load_from_stage(
        &mut self,
        table: &Table,
        file: &StagedFileRef,
        on_error: OnError,
    ) -> Result<u64> {
        let sql = copy_statement(table, file, self.iam_role.as_deref(), on_error);
        self.client
            .batch_execute(&sql)
            .map_err(|e| classify_pg_error(e, ReplicationError::Load))?;
        let row = self
            .client
            .query_one("SELECT pg_last_copy_count()::bigint", &[])
            .map_err(|e| classify_pg_error(e, ReplicationError::Load))?;
        let loaded: i64 = row.get(0);
        Ok(loaded.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnDescriptor;
    use crate::type_map::map_columns;

    fn staged(format: FileFormat) -> StagedFileRef {
        StagedFileRef {
            key: "staging/public/orders/f".into(),
            uri: "s3://bucket/staging/public/orders/f".into(),
            format,
            row_count: 3,
            batch_number: 0,
            correlation_id: "cid".into(),
        }
    }

    #[test]
    fn test_create_table_is_idempotent_ddl() {
        let columns = map_columns(&[
            ColumnDescriptor::new("id", "bigint").not_null(),
            ColumnDescriptor::new("doc", "jsonb"),
        ]);
        assert_eq!(
            create_table_statement(&Table::new("public", "orders"), &columns),
            "CREATE TABLE IF NOT EXISTS \"public\".\"orders\" (\"id\" BIGINT NOT NULL, \"doc\" SUPER NULL)"
        );
    }

    #[test]
    fn test_insert_numbers_parameters_row_by_row() {
        let columns = vec![
            ("id".to_string(), Some(TargetType::Integer)),
            ("doc".to_string(), Some(TargetType::Super)),
        ];
        assert_eq!(
            insert_statement(&Table::new("public", "orders"), &columns, 2),
            "INSERT INTO \"public\".\"orders\" (\"id\", \"doc\") VALUES \
             (CAST($1::varchar AS INTEGER), JSON_PARSE($2::varchar)), \
             (CAST($3::varchar AS INTEGER), JSON_PARSE($4::varchar))"
        );
    }

    #[test]
    fn test_copy_statement_error_policy() {
        let table = Table::new("public", "orders");
        let strict = copy_statement(&table, &staged(FileFormat::Csv), Some("arn:role"), OnError::Abort);
        assert_eq!(
            strict,
            "COPY \"public\".\"orders\" FROM 's3://bucket/staging/public/orders/f' \
             IAM_ROLE 'arn:role' FORMAT AS CSV IGNOREHEADER 1 EMPTYASNULL \
             TIMEFORMAT 'auto' DATEFORMAT 'auto' MAXERROR 0"
        );
        let lenient = copy_statement(&table, &staged(FileFormat::Csv), None, OnError::Continue);
        assert!(lenient.ends_with("MAXERROR 100000"));
        let parquet = copy_statement(&table, &staged(FileFormat::Parquet), None, OnError::Abort);
        assert!(parquet.ends_with("FORMAT AS PARQUET"));
    }

    #[test]
    fn test_insert_params_keep_wide_numerics() {
        let rows: Vec<Row> = vec![
            serde_json::from_str(r#"{"id": 1, "amount": 12345678901234567.1234567891}"#).unwrap(),
            serde_json::from_str(r#"{"id": 2}"#).unwrap(),
        ];
        let columns = vec![
            ("id".to_string(), Some(TargetType::BigInt)),
            ("amount".to_string(), Some(TargetType::Numeric)),
        ];
        assert_eq!(
            row_params(&rows, &columns),
            vec![
                Some("1".to_string()),
                Some("12345678901234567.1234567891".to_string()),
                Some("2".to_string()),
                None,
            ]
        );
    }
}
