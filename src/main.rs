//! Main binary entry point for postgres-warehouse-sync.

use anyhow::{Context, Result};
use chrono::Duration;
use postgres_warehouse_sync::args::{
    Command, Connections, JanitorAction, JobArgs, LoadArgs, LogFormat, StagingArgs, get_args,
    job_request,
};
use postgres_warehouse_sync::job::new_correlation_id;
use postgres_warehouse_sync::{
    LoadStrategy, ObjectStoreStaging, PostgresSource, RedshiftLoader, ReplicationEngine,
    Response, RunSummary, ScopeFilter, StagingJanitor, StagingStore,
};
use r2d2::Pool;
use r2d2_postgres::{PostgresConnectionManager, postgres::NoTls as R2d2NoTls};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn connect(uri: &str) -> Result<Pool<PostgresConnectionManager<R2d2NoTls>>> {
    let manager = PostgresConnectionManager::new(uri.parse()?, R2d2NoTls);
    Ok(Pool::builder().max_size(1).build(manager)?)
}

fn staging_store(staging: &StagingArgs) -> Result<ObjectStoreStaging> {
    let bucket = staging
        .bucket
        .as_deref()
        .context("S3_STAGE_BUCKET must be set to use the staging store")?;
    Ok(ObjectStoreStaging::s3(
        bucket,
        staging.region.as_deref(),
        staging.endpoint.as_deref(),
    )?)
}

fn replicate(
    correlation_id: &str,
    connections: &Connections,
    staging: &StagingArgs,
    load: &LoadArgs,
    job: &JobArgs,
    event: Option<&str>,
) -> Result<RunSummary> {
    let config = load.engine_config(&staging.prefix)?;
    let job = job_request(job, event)?.into_job(correlation_id)?;
    let store = match config.strategy {
        LoadStrategy::Staged => Some(staging_store(staging)?),
        LoadStrategy::Direct => None,
    };
    let mut source = PostgresSource::from_pool(&connect(&connections.source_uri)?)?;
    let mut target = RedshiftLoader::from_pool(&connect(&connections.warehouse_uri)?)?;
    if let Some(role) = &connections.copy_iam_role {
        target = target.with_iam_role(role);
    }
    let mut engine = ReplicationEngine::new(
        &mut source,
        &mut target,
        store.as_ref().map(|s| s as &dyn StagingStore),
        &config,
    )?;
    Ok(engine.replicate(&job)?)
}

fn janitor(staging: &StagingArgs, action: &JanitorAction) -> Result<serde_json::Value> {
    let store = staging_store(staging)?;
    let janitor = StagingJanitor::new(&store, &staging.prefix);
    let value = match action {
        JanitorAction::Stats => serde_json::to_value(janitor.stats()?)?,
        JanitorAction::CleanupOld {
            older_than_days,
            schema,
            table,
            dry_run,
        } => serde_json::to_value(janitor.delete_older_than(
            Duration::days(*older_than_days),
            &ScopeFilter::new(schema.as_deref(), table.as_deref()),
            *dry_run,
        )?)?,
        JanitorAction::CleanupOrphans {
            max_age_hours,
            dry_run,
        } => serde_json::to_value(
            janitor.cleanup_orphans(Duration::hours(*max_age_hours), *dry_run)?,
        )?,
    };
    Ok(value)
}

fn emit<T: Serialize>(response: &Response<T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = get_args()?;
    init_logging(args.log_format);
    let correlation_id = new_correlation_id();
    let success = match &args.command {
        Command::Replicate {
            connections,
            staging,
            load,
            job,
            event,
        } => {
            let response = match replicate(
                &correlation_id,
                connections,
                staging,
                load,
                job,
                event.as_deref(),
            ) {
                Ok(summary) => Response::from_summary(&correlation_id, summary),
                Err(e) => {
                    tracing::error!(correlation_id = %correlation_id, error = %format!("{:#}", e), "replication failed");
                    Response::failed(&correlation_id, "replication failed", format!("{:#}", e))
                }
            };
            emit(&response)?;
            response.is_success()
        }
        Command::Janitor { staging, action } => {
            let response = match janitor(staging, action) {
                Ok(report) => Response::ok(&correlation_id, "staging maintenance completed", report),
                Err(e) => {
                    tracing::error!(correlation_id = %correlation_id, error = %format!("{:#}", e), "staging maintenance failed");
                    Response::failed(&correlation_id, "staging maintenance failed", format!("{:#}", e))
                }
            };
            emit(&response)?;
            response.is_success()
        }
    };
    if !success {
        std::process::exit(1);
    }
    Ok(())
}
