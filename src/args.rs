use crate::codec::FileFormat;
use crate::config::{CleanupMode, CleanupPolicy, EngineConfig, LoadStrategy, OnError};
use crate::error::{ReplicationError, Result};
use crate::job::JobRequest;
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde_json::Value;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log output format (logs go to stderr)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replicate one table from the source into the warehouse
    Replicate {
        #[command(flatten)]
        connections: Connections,

        #[command(flatten)]
        staging: StagingArgs,

        #[command(flatten)]
        load: LoadArgs,

        #[command(flatten)]
        job: JobArgs,

        /// Trigger payload (JSON); its fields override the job defaults
        #[arg(long)]
        event: Option<String>,
    },
    /// Maintenance of the staging bucket
    Janitor {
        #[command(flatten)]
        staging: StagingArgs,

        #[command(subcommand)]
        action: JanitorAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum JanitorAction {
    /// File counts and sizes per schema and table
    Stats,
    /// Delete staged files older than a number of days
    CleanupOld {
        #[arg(long, default_value_t = 7)]
        older_than_days: i64,

        #[arg(long)]
        schema: Option<String>,

        #[arg(long)]
        table: Option<String>,

        /// Report what would be deleted without deleting
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },
    /// Delete files that were staged but never loaded
    CleanupOrphans {
        #[arg(long, default_value_t = 24)]
        max_age_hours: i64,

        /// Report what would be deleted without deleting
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct Connections {
    /// Source PostgreSQL connection URI
    #[arg(long, env = "SOURCE_DATABASE_URL")]
    pub source_uri: String,

    /// Warehouse connection URI
    #[arg(long, env = "WAREHOUSE_DATABASE_URL")]
    pub warehouse_uri: String,

    /// IAM role the warehouse assumes to read staged files
    #[arg(long, env = "COPY_IAM_ROLE")]
    pub copy_iam_role: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StagingArgs {
    /// Staging bucket
    #[arg(long, env = "S3_STAGE_BUCKET")]
    pub bucket: Option<String>,

    /// Key prefix of staged files
    #[arg(long, env = "S3_STAGE_PREFIX", default_value = "staging")]
    pub prefix: String,

    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Custom S3 endpoint (S3-compatible stores)
    #[arg(long, env = "S3_ENDPOINT")]
    pub endpoint: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct LoadArgs {
    /// direct or staged
    #[arg(long, env = "LOAD_STRATEGY", default_value = "direct")]
    pub load_strategy: String,

    /// csv or parquet
    #[arg(long, env = "FILE_FORMAT", default_value = "csv")]
    pub file_format: String,

    #[arg(long, env = "CLEANUP_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub cleanup_enabled: bool,

    /// after_each, after_all or never
    #[arg(long, env = "CLEANUP_MODE", default_value = "after_all")]
    pub cleanup_mode: String,

    /// Bulk-load error policy: abort or continue
    #[arg(long, env = "ON_ERROR", default_value = "abort")]
    pub on_error: String,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct JobArgs {
    #[arg(long, env = "SCHEMA_NAME", default_value = "public")]
    pub schema_name: String,

    #[arg(long, env = "TABLE_NAME")]
    pub table_name: Option<String>,

    /// full or incremental
    #[arg(long, env = "REPLICATION_MODE", default_value = "full")]
    pub replication_mode: String,

    #[arg(long, env = "INCREMENTAL_COLUMN")]
    pub incremental_column: Option<String>,

    /// Last replicated value of the incremental column (JSON, or plain text)
    #[arg(long)]
    pub last_value: Option<String>,

    #[arg(long, env = "BATCH_SIZE", default_value_t = crate::job::DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
}

impl LoadArgs {
    pub fn engine_config(&self, prefix: &str) -> Result<EngineConfig> {
        let config = EngineConfig {
            strategy: self.load_strategy.parse::<LoadStrategy>()?,
            file_format: self.file_format.parse::<FileFormat>()?,
            cleanup: CleanupPolicy {
                enabled: self.cleanup_enabled,
                mode: self.cleanup_mode.parse::<CleanupMode>()?,
            },
            on_error: self.on_error.parse::<OnError>()?,
            ..EngineConfig::default()
        };
        Ok(config.with_prefix(prefix))
    }
}

impl JobArgs {
    pub fn defaults(&self) -> JobRequest {
        JobRequest {
            schema_name: Some(self.schema_name.clone()),
            table_name: self.table_name.clone(),
            mode: Some(self.replication_mode.clone()),
            incremental_column: self.incremental_column.clone(),
            last_value: self.last_value.as_deref().map(parse_value),
            batch_size: Some(self.batch_size),
        }
    }
}

/// JSON when it parses, otherwise the raw text.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Combines the trigger payload with the job defaults from flags and environment.
pub fn job_request(job: &JobArgs, event: Option<&str>) -> Result<JobRequest> {
    let defaults = job.defaults();
    match event {
        None => Ok(defaults),
        Some(raw) => {
            let request: JobRequest = serde_json::from_str(raw).map_err(|e| {
                ReplicationError::Configuration(format!("invalid event payload: {}", e))
            })?;
            Ok(request.merged_over(&defaults))
        }
    }
}

pub fn get_args() -> std::result::Result<Args, clap::Error> {
    Args::try_parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replicate_flags() {
        let args = Args::try_parse_from([
            "postgres-warehouse-sync",
            "replicate",
            "--source-uri",
            "postgres://source/db",
            "--warehouse-uri",
            "postgres://warehouse/dev",
            "--table-name",
            "orders",
            "--load-strategy",
            "staged",
            "--cleanup-mode",
            "after_each",
            "--last-value",
            "42",
        ])
        .unwrap();
        let Command::Replicate { load, job, staging, .. } = args.command else {
            panic!("expected replicate");
        };
        let config = load.engine_config(&staging.prefix).unwrap();
        assert_eq!(config.strategy, LoadStrategy::Staged);
        assert_eq!(config.cleanup.mode, CleanupMode::AfterEach);
        assert_eq!(config.staging_prefix, "staging");
        let request = job_request(&job, None).unwrap();
        assert_eq!(request.last_value, Some(serde_json::json!(42)));
    }

    #[test]
    fn test_event_overrides_defaults() {
        let args = Args::try_parse_from([
            "postgres-warehouse-sync",
            "replicate",
            "--source-uri",
            "s",
            "--warehouse-uri",
            "w",
            "--table-name",
            "ambient",
            "--batch-size",
            "50",
        ])
        .unwrap();
        let Command::Replicate { job, .. } = args.command else {
            panic!("expected replicate");
        };
        let request = job_request(&job, Some(r#"{"table_name": "orders"}"#)).unwrap();
        let job = request.into_job("cid").unwrap();
        assert_eq!(job.table.name, "orders");
        assert_eq!(job.batch_size, 50);
        assert!(job_request(&job_args_stub(), Some("not json")).is_err());
    }

    fn job_args_stub() -> JobArgs {
        JobArgs {
            schema_name: "public".into(),
            table_name: None,
            replication_mode: "full".into(),
            incremental_column: None,
            last_value: None,
            batch_size: 10,
        }
    }

    #[test]
    fn test_plain_text_last_value() {
        assert_eq!(parse_value("2024-01-01 10:00:00"), Value::String("2024-01-01 10:00:00".into()));
    }
}
