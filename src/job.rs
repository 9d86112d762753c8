// src/job.rs
// Job descriptions coming from a trigger, and the summary a run produces.

use crate::error::{ReplicationError, Result};
use crate::table::Table;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;

#[derive(Clone, Debug, PartialEq)]
pub enum ReplicationMode {
    /// Truncate the target once, then copy every row.
    Full,
    /// Append rows whose `column` is strictly greater than `watermark`.
    Incremental {
        column: String,
        watermark: Option<Value>,
    },
}

impl ReplicationMode {
    pub fn name(&self) -> &'static str {
        match self {
            ReplicationMode::Full => "full",
            ReplicationMode::Incremental { .. } => "incremental",
        }
    }

    pub fn incremental_column(&self) -> Option<&str> {
        match self {
            ReplicationMode::Full => None,
            ReplicationMode::Incremental { column, .. } => Some(column),
        }
    }
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One validated execution request.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicationJob {
    pub table: Table,
    pub mode: ReplicationMode,
    pub batch_size: usize,
    pub correlation_id: String,
}

impl ReplicationJob {
    pub fn full(table: Table) -> Self {
        ReplicationJob {
            table,
            mode: ReplicationMode::Full,
            batch_size: DEFAULT_BATCH_SIZE,
            correlation_id: new_correlation_id(),
        }
    }

    pub fn incremental(table: Table, column: &str, watermark: Option<Value>) -> Self {
        ReplicationJob {
            mode: ReplicationMode::Incremental {
                column: column.to_string(),
                watermark,
            },
            ..ReplicationJob::full(table)
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_id = correlation_id.to_string();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ReplicationError::Configuration(
                "batch_size must be greater than zero".into(),
            ));
        }
        if let ReplicationMode::Incremental { column, .. } = &self.mode {
            if column.trim().is_empty() {
                return Err(ReplicationError::Configuration(
                    "incremental mode requires an incremental column".into(),
                ));
            }
        }
        Ok(())
    }
}

pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Trigger-shaped job input. Every field is optional here; missing ones are filled from
/// the ambient defaults before the request is turned into a [`ReplicationJob`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct JobRequest {
    #[serde(default, alias = "schema")]
    pub schema_name: Option<String>,
    #[serde(default, alias = "table")]
    pub table_name: Option<String>,
    #[serde(default, alias = "replication_mode")]
    pub mode: Option<String>,
    #[serde(default)]
    pub incremental_column: Option<String>,
    #[serde(default, alias = "watermark")]
    pub last_value: Option<Value>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl JobRequest {
    /// Fields set in `self` win over the ones in `defaults`.
    pub fn merged_over(self, defaults: &JobRequest) -> JobRequest {
        JobRequest {
            schema_name: self.schema_name.or_else(|| defaults.schema_name.clone()),
            table_name: self.table_name.or_else(|| defaults.table_name.clone()),
            mode: self.mode.or_else(|| defaults.mode.clone()),
            incremental_column: self
                .incremental_column
                .or_else(|| defaults.incremental_column.clone()),
            last_value: self.last_value.or_else(|| defaults.last_value.clone()),
            batch_size: self.batch_size.or(defaults.batch_size),
        }
    }

    pub fn into_job(self, correlation_id: &str) -> Result<ReplicationJob> {
        let table_name = self
            .table_name
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ReplicationError::Configuration("table_name must be provided".into()))?;
        let schema_name = self.schema_name.unwrap_or_else(|| "public".to_string());
        let table = Table::new(&schema_name, &table_name);
        let column = self.incremental_column.filter(|c| !c.trim().is_empty());
        let mode = self.mode.as_deref().unwrap_or("full").to_lowercase();

        let job = match (mode.as_str(), column) {
            ("full", None) => ReplicationJob::full(table),
            ("full", Some(column)) => {
                return Err(ReplicationError::Configuration(format!(
                    "incremental column {} given for a full replication",
                    column
                )));
            }
            ("incremental", Some(column)) => {
                ReplicationJob::incremental(table, &column, self.last_value.filter(|v| !v.is_null()))
            }
            ("incremental", None) => {
                return Err(ReplicationError::Configuration(
                    "incremental mode requires an incremental column".into(),
                ));
            }
            (other, _) => {
                return Err(ReplicationError::Configuration(format!(
                    "unknown replication mode: {}",
                    other
                )));
            }
        };
        let job = job
            .with_batch_size(self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE))
            .with_correlation_id(correlation_id);
        job.validate()?;
        Ok(job)
    }
}

/// Result of one job execution.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub success: bool,
    pub schema: String,
    pub table: String,
    /// Rows durably written to the target.
    pub rows_replicated: u64,
    /// Highest incremental value seen; always `None` for full replication.
    pub final_watermark: Option<Value>,
    pub files_staged: usize,
    pub files_loaded: usize,
    /// Staging keys whose bulk load failed. They stay in the staging store.
    pub failed_files: Vec<String>,
}
