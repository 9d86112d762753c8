// src/staging.rs
// Staging store interface, file naming, and the object-store implementation.

use crate::batch::Batch;
use crate::codec::{self, FileFormat};
use crate::error::{ReplicationError, Result};
use crate::table::Table;
use crate::type_map::TargetColumn;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// A batch uploaded to the staging store and waiting to be bulk-loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedFileRef {
    pub key: String,
    /// Location the warehouse reads the file from, e.g. `s3://bucket/key`.
    pub uri: String,
    pub format: FileFormat,
    pub row_count: usize,
    pub batch_number: usize,
    pub correlation_id: String,
}

/// Metadata attached to every staged object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadMetadata {
    pub schema: String,
    pub table: String,
    pub batch_number: usize,
    pub row_count: usize,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub format: FileFormat,
}

impl UploadMetadata {
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("schema", self.schema.clone()),
            ("table", self.table.clone()),
            ("batch_number", self.batch_number.to_string()),
            ("row_count", self.row_count.to_string()),
            ("correlation_id", self.correlation_id.clone()),
            ("timestamp", self.timestamp.to_rfc3339()),
        ]
    }
}

/// One object as reported by a listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl FileMetadata {
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_modified).num_seconds() as f64 / 3600.0
    }
}

pub trait StagingStore {
    fn upload(&self, key: &str, payload: Vec<u8>, metadata: &UploadMetadata) -> Result<()>;
    /// Deleting a key that does not exist succeeds.
    fn delete(&self, key: &str) -> Result<()>;
    /// Every object whose key starts with `prefix`. An empty prefix lists the whole store.
    fn list(&self, prefix: &str) -> Result<Vec<FileMetadata>>;
    fn uri(&self, key: &str) -> String;
}

/// `prefix/schema/table/schema_table_batch<N>_<YYYYmmdd_HHMMSSmmm>.<ext>`
pub fn staging_key(
    prefix: &str,
    table: &Table,
    batch_number: usize,
    timestamp: DateTime<Utc>,
    format: FileFormat,
) -> String {
    let file = format!(
        "{}_{}_batch{}_{}.{}",
        table.schema,
        table.name,
        batch_number,
        timestamp.format("%Y%m%d_%H%M%S%3f"),
        format.extension()
    );
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}/{}", table.schema, table.name, file)
    } else {
        format!("{}/{}/{}/{}", prefix, table.schema, table.name, file)
    }
}

/// Key prefix covering one schema, or one table of a schema.
pub fn scope_prefix(prefix: &str, schema: Option<&str>, table: Option<&str>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let prefix = prefix.trim_matches('/');
    if !prefix.is_empty() {
        parts.push(prefix);
    }
    if let Some(schema) = schema {
        parts.push(schema);
        if let Some(table) = table {
            parts.push(table);
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("{}/", parts.join("/"))
    }
}

/// Schema and table segments of a staging key laid out by [`staging_key`].
pub fn key_scope<'k>(prefix: &str, key: &'k str) -> Option<(&'k str, &'k str)> {
    let prefix = prefix.trim_matches('/');
    let rest = if prefix.is_empty() {
        key
    } else {
        key.strip_prefix(prefix)?.strip_prefix('/')?
    };
    let mut segments = rest.split('/');
    let schema = segments.next().filter(|s| !s.is_empty())?;
    let table = segments.next().filter(|s| !s.is_empty())?;
    segments.next()?;
    Some((schema, table))
}

/// Encodes a batch against the target table's `columns` and uploads it under its
/// staging key.
pub fn stage_batch(
    store: &dyn StagingStore,
    prefix: &str,
    format: FileFormat,
    table: &Table,
    columns: &[TargetColumn],
    batch: &Batch,
    correlation_id: &str,
) -> Result<StagedFileRef> {
    if batch.is_empty() {
        return Err(ReplicationError::Staging(format!(
            "refusing to stage empty batch {} of {}",
            batch.number, table
        )));
    }
    let timestamp = Utc::now();
    let key = staging_key(prefix, table, batch.number, timestamp, format);
    let payload = codec::encode(format, batch, columns)?;
    let metadata = UploadMetadata {
        schema: table.schema.clone(),
        table: table.name.clone(),
        batch_number: batch.number,
        row_count: batch.len(),
        correlation_id: correlation_id.to_string(),
        timestamp,
        format,
    };
    store.upload(&key, payload, &metadata)?;
    Ok(StagedFileRef {
        uri: store.uri(&key),
        key,
        format,
        row_count: batch.len(),
        batch_number: batch.number,
        correlation_id: correlation_id.to_string(),
    })
}

/// [`StagingStore`] over any `object_store` backend, driven from synchronous code.
pub struct ObjectStoreStaging {
    store: Arc<dyn ObjectStore>,
    base_uri: String,
    runtime: Runtime,
}

impl ObjectStoreStaging {
    /// `base_uri` is what the warehouse uses to address the store, e.g. `s3://bucket`.
    pub fn new(store: Arc<dyn ObjectStore>, base_uri: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ReplicationError::Configuration(format!("tokio runtime: {}", e)))?;
        Ok(ObjectStoreStaging {
            store,
            base_uri: base_uri.trim_end_matches('/').to_string(),
            runtime,
        })
    }

    /// S3 bucket client. Credentials come from the usual AWS environment.
    pub fn s3(bucket: &str, region: Option<&str>, endpoint: Option<&str>) -> Result<Self> {
        use object_store::aws::AmazonS3Builder;

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let store = builder.build().map_err(|e| {
            ReplicationError::Configuration(format!("failed to create S3 client: {}", e))
        })?;
        Self::new(Arc::new(store), &format!("s3://{}", bucket))
    }
}

impl StagingStore for ObjectStoreStaging {
    fn upload(&self, key: &str, payload: Vec<u8>, metadata: &UploadMetadata) -> Result<()> {
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, metadata.format.content_type().into());
        for (name, value) in metadata.pairs() {
            attributes.insert(Attribute::Metadata(name.into()), value.into());
        }
        let options = PutOptions {
            attributes,
            ..Default::default()
        };
        let path = Path::from(key);
        self.runtime
            .block_on(self.store.put_opts(&path, PutPayload::from(payload), options))
            .map_err(|e| ReplicationError::Staging(format!("upload of {} failed: {}", key, e)))?;
        tracing::debug!(key, "uploaded staging file");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = Path::from(key);
        match self.runtime.block_on(self.store.delete(&path)) {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(ReplicationError::Cleanup(format!(
                "delete of {} failed: {}",
                key, e
            ))),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<FileMetadata>> {
        let prefix = prefix.trim_matches('/');
        let path = Path::from(prefix);
        let listing = if prefix.is_empty() {
            self.store.list(None)
        } else {
            self.store.list(Some(&path))
        };
        let objects = self
            .runtime
            .block_on(listing.try_collect::<Vec<_>>())
            .map_err(|e| ReplicationError::Connectivity(format!("listing {} failed: {}", prefix, e)))?;
        Ok(objects
            .into_iter()
            .map(|meta| FileMetadata {
                key: meta.location.to_string(),
                size: meta.size,
                last_modified: meta.last_modified,
            })
            .collect())
    }

    fn uri(&self, key: &str) -> String {
        format!("{}/{}", self.base_uri, key)
    }
}
