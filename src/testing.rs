//! In-memory collaborators for exercising the engine and the janitor without a database
//! or an object store.
//!
//! Every fake records what it was asked to do. Fakes that share a [`Journal`] write into
//! one ordered log, so tests can check that, say, the truncate came before the first
//! extraction.
//!
//! ```rust,ignore
//! let journal = Journal::default();
//! let mut source = MemorySource::new(columns, rows).with_journal(&journal);
//! let mut target = RecordingWarehouse::new().with_journal(&journal);
//! let summary = ReplicationEngine::new(&mut source, &mut target, None, EngineConfig::direct())?
//!     .replicate(&job)?;
//! assert_eq!(journal.count("truncate"), 1);
//! ```

use crate::batch::Row;
use crate::config::OnError;
use crate::error::{ReplicationError, Result};
use crate::source::{Cursor, ExtractRequest, SourceExtractor};
use crate::staging::{FileMetadata, StagedFileRef, StagingStore, UploadMetadata};
use crate::table::{ColumnDescriptor, Table};
use crate::type_map::TargetColumn;
use crate::watermark;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Ordered log of collaborator calls, shareable between fakes.
#[derive(Clone, Debug, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.0).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    /// Number of entries whose first word is `kind`.
    pub fn count(&self, kind: &str) -> usize {
        lock(&self.0)
            .iter()
            .filter(|e| e.split(' ').next() == Some(kind))
            .count()
    }

    /// Index of the first entry whose first word is `kind`.
    pub fn first(&self, kind: &str) -> Option<usize> {
        lock(&self.0)
            .iter()
            .position(|e| e.split(' ').next() == Some(kind))
    }
}

/// One call to [`MemorySource::extract`].
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractCall {
    pub offset: Option<u64>,
    pub watermark: Option<Value>,
    pub batch_size: usize,
    pub returned: usize,
}

/// A single source table held in memory.
#[derive(Debug, Default)]
pub struct MemorySource {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Row>,
    fail_on_call: Option<usize>,
    pub calls: Vec<ExtractCall>,
    journal: Journal,
}

impl MemorySource {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Row>) -> Self {
        MemorySource {
            columns,
            rows,
            ..Default::default()
        }
    }

    pub fn with_journal(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    /// Makes the n-th (zero-based) extraction fail.
    pub fn fail_on_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls.iter().map(|c| c.returned).collect()
    }
}

impl SourceExtractor for MemorySource {
    fn describe_table(&mut self, table: &Table) -> Result<Vec<ColumnDescriptor>> {
        self.journal.record(format!("describe {}", table));
        Ok(self.columns.clone())
    }

    fn extract(&mut self, request: &ExtractRequest<'_>) -> Result<Vec<Row>> {
        let call = self.calls.len();
        self.journal.record(format!("extract {}", call));
        if self.fail_on_call == Some(call) {
            return Err(ReplicationError::Extraction(format!(
                "extraction {} failed",
                call
            )));
        }
        let (rows, offset, watermark): (Vec<Row>, _, _) = match request.cursor {
            Cursor::Offset(offset) => (
                self.rows
                    .iter()
                    .skip(offset as usize)
                    .take(request.batch_size)
                    .cloned()
                    .collect(),
                Some(offset),
                None,
            ),
            Cursor::After { column, watermark } => {
                let key = column.name.as_str();
                let mut matching: Vec<&Row> = self
                    .rows
                    .iter()
                    .filter(|row| {
                        let value = row.get(key).unwrap_or(&Value::Null);
                        match watermark {
                            Some(w) => watermark::compare(value, w) == Some(Ordering::Greater),
                            None => true,
                        }
                    })
                    .collect();
                // Nulls sort last, like the source does.
                matching.sort_by(|a, b| {
                    let (a, b) = (
                        a.get(key).unwrap_or(&Value::Null),
                        b.get(key).unwrap_or(&Value::Null),
                    );
                    match (a.is_null(), b.is_null()) {
                        (true, true) => Ordering::Equal,
                        (true, false) => Ordering::Greater,
                        (false, true) => Ordering::Less,
                        _ => watermark::compare(a, b).unwrap_or(Ordering::Equal),
                    }
                });
                (
                    matching
                        .into_iter()
                        .take(request.batch_size)
                        .cloned()
                        .collect(),
                    None,
                    watermark.cloned(),
                )
            }
        };
        self.calls.push(ExtractCall {
            offset,
            watermark,
            batch_size: request.batch_size,
            returned: rows.len(),
        });
        Ok(rows)
    }
}

/// Target that keeps every loaded row and records each call.
#[derive(Debug, Default)]
pub struct RecordingWarehouse {
    pub created: Vec<(Table, Vec<TargetColumn>)>,
    pub truncates: usize,
    /// `(rows, truncate_first)` per direct load.
    pub direct_loads: Vec<(usize, bool)>,
    /// Keys of staged files loaded successfully, in order.
    pub stage_loads: Vec<String>,
    pub rows: Vec<Row>,
    fail_direct_on_call: Option<usize>,
    fail_stage_batches: HashSet<usize>,
    skip_per_file: u64,
    journal: Journal,
}

impl RecordingWarehouse {
    pub fn new() -> Self {
        RecordingWarehouse::default()
    }

    pub fn with_journal(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    pub fn fail_direct_on_call(mut self, n: usize) -> Self {
        self.fail_direct_on_call = Some(n);
        self
    }

    /// Bulk loads of files staged from these batch numbers fail.
    pub fn fail_stage_batches(mut self, batches: &[usize]) -> Self {
        self.fail_stage_batches = batches.iter().copied().collect();
        self
    }

    /// Under `OnError::Continue` every file loads this many rows fewer than it holds.
    pub fn skip_rows_per_file(mut self, n: u64) -> Self {
        self.skip_per_file = n;
        self
    }

    pub fn rows_loaded(&self) -> usize {
        self.rows.len()
    }
}

impl crate::warehouse::TargetLoader for RecordingWarehouse {
    fn ensure_table(&mut self, table: &Table, columns: &[TargetColumn]) -> Result<()> {
        self.journal.record(format!("ensure_table {}", table));
        self.created.push((table.clone(), columns.to_vec()));
        Ok(())
    }

    fn truncate(&mut self, table: &Table) -> Result<()> {
        self.journal.record(format!("truncate {}", table));
        self.truncates += 1;
        self.rows.clear();
        Ok(())
    }

    fn load_direct(&mut self, table: &Table, rows: &[Row], truncate_first: bool) -> Result<u64> {
        let call = self.direct_loads.len();
        self.journal.record(format!("load_direct {} {}", table, rows.len()));
        self.direct_loads.push((rows.len(), truncate_first));
        if self.fail_direct_on_call == Some(call) {
            return Err(ReplicationError::Load(format!("direct load {} failed", call)));
        }
        if truncate_first {
            self.truncates += 1;
            self.rows.clear();
        }
        self.rows.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    fn load_from_stage(
        &mut self,
        table: &Table,
        file: &StagedFileRef,
        on_error: OnError,
    ) -> Result<u64> {
        self.journal
            .record(format!("load_from_stage {} {}", table, file.key));
        if self.fail_stage_batches.contains(&file.batch_number) {
            return Err(ReplicationError::Load(format!(
                "COPY from {} failed",
                file.uri
            )));
        }
        self.stage_loads.push(file.key.clone());
        let rows = file.row_count as u64;
        Ok(match on_error {
            OnError::Abort => rows,
            OnError::Continue => rows.saturating_sub(self.skip_per_file),
        })
    }
}

#[derive(Clone, Debug)]
struct StoredObject {
    payload: Vec<u8>,
    size: u64,
    metadata: Vec<(&'static str, String)>,
    last_modified: DateTime<Utc>,
}

/// Staging store over a map of keys, with settable file ages and injectable failures.
#[derive(Debug, Default)]
pub struct MemoryStaging {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    fail_uploads_after: Option<usize>,
    uploads: Mutex<usize>,
    failing_deletes: HashSet<String>,
    deleted: Mutex<Vec<String>>,
    journal: Journal,
}

impl MemoryStaging {
    pub fn new() -> Self {
        MemoryStaging::default()
    }

    pub fn with_journal(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    /// Adds an object of `size` bytes last modified `age` ago.
    pub fn with_file(self, key: &str, size: u64, age: Duration) -> Self {
        lock(&self.objects).insert(
            key.to_string(),
            StoredObject {
                payload: Vec::new(),
                size,
                metadata: Vec::new(),
                last_modified: Utc::now() - age,
            },
        );
        self
    }

    /// Uploads succeed `n` times, then fail.
    pub fn fail_uploads_after(mut self, n: usize) -> Self {
        self.fail_uploads_after = Some(n);
        self
    }

    pub fn fail_delete_of(mut self, key: &str) -> Self {
        self.failing_deletes.insert(key.to_string());
        self
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    pub fn payload(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects).get(key).map(|o| o.payload.clone())
    }

    pub fn metadata(&self, key: &str) -> Option<Vec<(&'static str, String)>> {
        lock(&self.objects).get(key).map(|o| o.metadata.clone())
    }

    /// Keys successfully deleted, in order.
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }
}

impl StagingStore for MemoryStaging {
    fn upload(&self, key: &str, payload: Vec<u8>, metadata: &UploadMetadata) -> Result<()> {
        let mut uploads = lock(&self.uploads);
        self.journal.record(format!("upload {}", key));
        if self.fail_uploads_after.is_some_and(|n| *uploads >= n) {
            return Err(ReplicationError::Staging(format!("upload of {} failed", key)));
        }
        *uploads += 1;
        lock(&self.objects).insert(
            key.to_string(),
            StoredObject {
                size: payload.len() as u64,
                payload,
                metadata: metadata.pairs(),
                last_modified: metadata.timestamp,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.journal.record(format!("delete {}", key));
        if self.failing_deletes.contains(key) {
            return Err(ReplicationError::Cleanup(format!("delete of {} failed", key)));
        }
        lock(&self.objects).remove(key);
        lock(&self.deleted).push(key.to_string());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<FileMetadata>> {
        let prefix = prefix.trim_start_matches('/');
        Ok(lock(&self.objects)
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| FileMetadata {
                key: key.clone(),
                size: object.size,
                last_modified: object.last_modified,
            })
            .collect())
    }

    fn uri(&self, key: &str) -> String {
        format!("memory://staging/{}", key)
    }
}
