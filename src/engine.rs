// src/engine.rs
// Drives one replication job: schema, truncate, extract/dispatch loop, staged commit.

use crate::batch::Batch;
use crate::config::{CleanupMode, EngineConfig, LoadStrategy};
use crate::error::{ReplicationError, Result};
use crate::job::{ReplicationJob, ReplicationMode, RunSummary};
use crate::source::{Cursor, ExtractRequest, SourceExtractor};
use crate::staging::{StagedFileRef, StagingStore, stage_batch};
use crate::table::{ColumnDescriptor, Table};
use crate::type_map::{TargetColumn, map_columns};
use crate::warehouse::TargetLoader;
use crate::watermark;
use serde_json::Value;

/// Outcome of bulk-loading the files staged by one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommitOutcome {
    pub rows_loaded: u64,
    pub loaded: Vec<String>,
    pub failed: Vec<String>,
}

impl CommitOutcome {
    /// True when files were attempted and none of them loaded.
    pub fn all_failed(&self) -> bool {
        self.loaded.is_empty() && !self.failed.is_empty()
    }
}

pub struct ReplicationEngine<'a> {
    source: &'a mut dyn SourceExtractor,
    target: &'a mut dyn TargetLoader,
    staging: Option<&'a dyn StagingStore>,
    config: &'a EngineConfig,
}

impl<'a> ReplicationEngine<'a> {
    pub fn new(
        source: &'a mut dyn SourceExtractor,
        target: &'a mut dyn TargetLoader,
        staging: Option<&'a dyn StagingStore>,
        config: &'a EngineConfig,
    ) -> Result<Self> {
        if config.strategy == LoadStrategy::Staged && staging.is_none() {
            return Err(ReplicationError::Configuration(
                "staged load strategy requires a staging store".into(),
            ));
        }
        Ok(ReplicationEngine {
            source,
            target,
            staging,
            config,
        })
    }

    /// Runs `job` to completion. Fatal errors abort the run; staged files that fail to
    /// load are reported in the summary instead.
    pub fn replicate(&mut self, job: &ReplicationJob) -> Result<RunSummary> {
        let span = tracing::info_span!(
            "replicate",
            correlation_id = %job.correlation_id,
            schema = %job.table.schema,
            table = %job.table.name,
            mode = %job.mode,
        );
        let _entered = span.enter();
        job.validate()?;
        tracing::info!(batch_size = job.batch_size, strategy = ?self.config.strategy, "starting replication");

        let columns = self.source.describe_table(&job.table)?;
        if columns.is_empty() {
            return Err(ReplicationError::NotFound(job.table.to_string()));
        }
        let incremental = match &job.mode {
            ReplicationMode::Full => None,
            ReplicationMode::Incremental { column, .. } => {
                Some(find_column(&columns, column, &job.table)?)
            }
        };

        let target_columns = map_columns(&columns);
        self.target.ensure_table(&job.table, &target_columns)?;
        if job.mode == ReplicationMode::Full {
            self.target.truncate(&job.table)?;
        }

        let initial = match &job.mode {
            ReplicationMode::Full => None,
            ReplicationMode::Incremental { watermark, .. } => watermark.clone(),
        };
        let (rows_direct, final_watermark, staged) =
            self.run_batches(job, &target_columns, incremental, initial)?;

        let mut summary = RunSummary {
            success: true,
            schema: job.table.schema.clone(),
            table: job.table.name.clone(),
            rows_replicated: rows_direct,
            final_watermark,
            files_staged: staged.len(),
            ..Default::default()
        };
        if !staged.is_empty() {
            let outcome = self.commit_staged(&job.table, &staged);
            summary.rows_replicated += outcome.rows_loaded;
            summary.files_loaded = outcome.loaded.len();
            summary.success = !outcome.all_failed();
            summary.failed_files = outcome.failed;
        }
        if summary.success {
            tracing::info!(rows = summary.rows_replicated, "replication finished");
        } else {
            tracing::error!(files = summary.files_staged, "every staged file failed to load");
        }
        Ok(summary)
    }

    fn run_batches(
        &mut self,
        job: &ReplicationJob,
        target_columns: &[TargetColumn],
        incremental: Option<&ColumnDescriptor>,
        mut mark: Option<Value>,
    ) -> Result<(u64, Option<Value>, Vec<StagedFileRef>)> {
        let mut rows_replicated = 0u64;
        let mut staged: Vec<StagedFileRef> = Vec::new();
        let mut offset = 0u64;
        let mut batch_number = 0usize;
        loop {
            let cursor = match incremental {
                Some(column) => Cursor::After {
                    column,
                    watermark: mark.as_ref(),
                },
                None => Cursor::Offset(offset),
            };
            let rows = self.source.extract(&ExtractRequest {
                table: &job.table,
                batch_size: job.batch_size,
                cursor,
            })?;
            if rows.is_empty() {
                tracing::debug!(batch = batch_number, "source exhausted");
                break;
            }
            let batch = Batch::new(batch_number, rows);
            match self.config.strategy {
                LoadStrategy::Direct => {
                    rows_replicated += self.target.load_direct(&job.table, &batch.rows, false)?;
                }
                LoadStrategy::Staged => {
                    let file = self.stage(job, target_columns, &batch).inspect_err(|_| {
                        if !staged.is_empty() {
                            tracing::warn!(
                                files = staged.len(),
                                "run aborted; files already staged are left for cleanup"
                            );
                        }
                    })?;
                    staged.push(file);
                }
            }

            let previous = mark.clone();
            if let Some(column) = incremental {
                mark = watermark::advance(mark, watermark::batch_max(&batch.rows, &column.name));
            }
            offset += batch.len() as u64;
            tracing::info!(batch = batch.number, rows = batch.len(), "batch processed");

            if batch.len() < job.batch_size {
                break;
            }
            if incremental.is_some() && mark == previous {
                tracing::warn!(
                    batch = batch.number,
                    "watermark did not advance over a full batch; stopping"
                );
                break;
            }
            batch_number += 1;
        }
        Ok((rows_replicated, mark, staged))
    }

    fn stage(
        &self,
        job: &ReplicationJob,
        target_columns: &[TargetColumn],
        batch: &Batch,
    ) -> Result<StagedFileRef> {
        let store = self.staging.ok_or_else(|| {
            ReplicationError::Configuration("staged load strategy requires a staging store".into())
        })?;
        let file = stage_batch(
            store,
            &self.config.staging_prefix,
            self.config.file_format,
            &job.table,
            target_columns,
            batch,
            &job.correlation_id,
        )?;
        tracing::info!(key = %file.key, rows = file.row_count, "batch staged");
        Ok(file)
    }

    /// Bulk-loads every staged file in order. A failed file is recorded and skipped; it
    /// is never deleted.
    pub fn commit_staged(&mut self, table: &Table, files: &[StagedFileRef]) -> CommitOutcome {
        let mode = self.config.cleanup.effective_mode();
        let mut outcome = CommitOutcome::default();
        for file in files {
            match self.target.load_from_stage(table, file, self.config.on_error) {
                Ok(rows) => {
                    if rows < file.row_count as u64 {
                        tracing::warn!(key = %file.key, rows, expected = file.row_count, "rows skipped during bulk load");
                    } else {
                        tracing::info!(key = %file.key, rows, "staged file loaded");
                    }
                    outcome.rows_loaded += rows;
                    outcome.loaded.push(file.key.clone());
                    if mode == CleanupMode::AfterEach {
                        self.remove_staged(&file.key);
                    }
                }
                Err(e) => {
                    tracing::warn!(key = %file.key, error = %e, "staged file failed to load");
                    outcome.failed.push(file.key.clone());
                }
            }
        }
        if mode == CleanupMode::AfterAll {
            for key in &outcome.loaded {
                self.remove_staged(key);
            }
        }
        tracing::info!(
            loaded = outcome.loaded.len(),
            failed = outcome.failed.len(),
            rows = outcome.rows_loaded,
            cleanup = %mode,
            "staged files committed"
        );
        outcome
    }

    fn remove_staged(&self, key: &str) {
        if let Some(store) = self.staging {
            match store.delete(key) {
                Ok(()) => tracing::debug!(key, "staged file deleted"),
                Err(e) => tracing::warn!(key, error = %e, "could not delete staged file"),
            }
        }
    }
}

fn find_column<'c>(
    columns: &'c [ColumnDescriptor],
    name: &str,
    table: &Table,
) -> Result<&'c ColumnDescriptor> {
    columns.iter().find(|c| c.name == name).ok_or_else(|| {
        ReplicationError::Configuration(format!(
            "incremental column {} does not exist in {}",
            name, table
        ))
    })
}
