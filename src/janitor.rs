// src/janitor.rs
// Maintenance sweeps over the staging store: age-based and orphan reclamation, stats.

use crate::error::Result;
use crate::staging::{FileMetadata, StagingStore, key_scope, scope_prefix};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Restricts a sweep to one schema, one table, or a table name across all schemas.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    pub schema: Option<String>,
    pub table: Option<String>,
}

impl ScopeFilter {
    pub fn all() -> Self {
        ScopeFilter::default()
    }

    pub fn new(schema: Option<&str>, table: Option<&str>) -> Self {
        ScopeFilter {
            schema: schema.map(str::to_string),
            table: table.map(str::to_string),
        }
    }

    fn list_prefix(&self, prefix: &str) -> String {
        scope_prefix(prefix, self.schema.as_deref(), self.table.as_deref())
    }

    /// A table filter without a schema cannot narrow the listing prefix, so it is
    /// checked against the parsed key.
    fn matches(&self, prefix: &str, key: &str) -> bool {
        match (&self.schema, &self.table) {
            (None, Some(table)) => key_scope(prefix, key).is_some_and(|(_, t)| t == table),
            _ => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SweptFile {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub age_hours: f64,
}

impl SweptFile {
    fn new(file: &FileMetadata, now: DateTime<Utc>) -> Self {
        SweptFile {
            key: file.key.clone(),
            size: file.size,
            last_modified: file.last_modified,
            age_hours: file.age_hours(now),
        }
    }
}

/// Result of a deletion sweep. A dry run reports the same `found` and `total_bytes` as
/// a real run would, with nothing deleted.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub found: usize,
    pub deleted: usize,
    pub total_bytes: u64,
    pub dry_run: bool,
    pub files: Vec<SweptFile>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub total_files: usize,
    pub total_bytes: u64,
    pub by_schema: BTreeMap<String, usize>,
    /// Keyed by `schema.table`.
    pub by_table: BTreeMap<String, usize>,
}

pub struct StagingJanitor<'a> {
    store: &'a dyn StagingStore,
    prefix: String,
}

impl<'a> StagingJanitor<'a> {
    pub fn new(store: &'a dyn StagingStore, prefix: &str) -> Self {
        StagingJanitor {
            store,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Files last modified more than `age` ago.
    pub fn list_older_than(&self, age: Duration, scope: &ScopeFilter) -> Result<Vec<FileMetadata>> {
        self.list_older_than_at(Utc::now(), age, scope)
    }

    fn list_older_than_at(
        &self,
        now: DateTime<Utc>,
        age: Duration,
        scope: &ScopeFilter,
    ) -> Result<Vec<FileMetadata>> {
        let cutoff = now - age;
        let files: Vec<FileMetadata> = self
            .store
            .list(&scope.list_prefix(&self.prefix))?
            .into_iter()
            .filter(|f| f.last_modified < cutoff && scope.matches(&self.prefix, &f.key))
            .collect();
        tracing::info!(found = files.len(), %cutoff, "listed staged files older than cutoff");
        Ok(files)
    }

    pub fn delete_older_than(
        &self,
        age: Duration,
        scope: &ScopeFilter,
        dry_run: bool,
    ) -> Result<SweepReport> {
        let now = Utc::now();
        let files = self.list_older_than_at(now, age, scope)?;
        Ok(self.sweep(files, now, dry_run))
    }

    /// Any file older than `max_age` is treated as orphaned. Age is the only signal
    /// available here, so a file that is merely slow to load looks the same.
    pub fn cleanup_orphans(&self, max_age: Duration, dry_run: bool) -> Result<SweepReport> {
        let now = Utc::now();
        let files = self.list_older_than_at(now, max_age, &ScopeFilter::all())?;
        Ok(self.sweep(files, now, dry_run))
    }

    pub fn stats(&self) -> Result<BucketStats> {
        let mut stats = BucketStats::default();
        for file in self.store.list(&scope_prefix(&self.prefix, None, None))? {
            stats.total_files += 1;
            stats.total_bytes += file.size;
            if let Some((schema, table)) = key_scope(&self.prefix, &file.key) {
                *stats.by_schema.entry(schema.to_string()).or_default() += 1;
                *stats
                    .by_table
                    .entry(format!("{}.{}", schema, table))
                    .or_default() += 1;
            }
        }
        tracing::info!(files = stats.total_files, bytes = stats.total_bytes, "computed staging stats");
        Ok(stats)
    }

    fn sweep(&self, files: Vec<FileMetadata>, now: DateTime<Utc>, dry_run: bool) -> SweepReport {
        let mut report = SweepReport {
            found: files.len(),
            total_bytes: files.iter().map(|f| f.size).sum(),
            dry_run,
            files: files.iter().map(|f| SweptFile::new(f, now)).collect(),
            ..Default::default()
        };
        if dry_run {
            tracing::info!(found = report.found, bytes = report.total_bytes, "dry run, nothing deleted");
            return report;
        }
        for file in &files {
            match self.store.delete(&file.key) {
                Ok(()) => report.deleted += 1,
                Err(e) => tracing::warn!(key = %file.key, error = %e, "failed to delete staged file"),
            }
        }
        tracing::info!(
            found = report.found,
            deleted = report.deleted,
            bytes = report.total_bytes,
            "sweep finished"
        );
        report
    }
}
