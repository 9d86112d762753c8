//! Main library entry point for postgres-warehouse-sync.

pub mod args;
pub mod batch;
pub mod codec;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod janitor;
pub mod job;
pub mod source;
pub mod staging;
pub mod table;
pub mod testing;
pub mod type_map;
pub mod warehouse;
pub mod watermark;

// Re-export key types for ergonomic access

pub use self::table::*;
pub use batch::{Batch, Row};
pub use codec::FileFormat;
pub use config::{CleanupMode, CleanupPolicy, EngineConfig, LoadStrategy, OnError};
pub use engine::{CommitOutcome, ReplicationEngine};
pub use envelope::Response;
pub use error::{ReplicationError, Result};
pub use janitor::{BucketStats, ScopeFilter, StagingJanitor, SweepReport};
pub use job::{JobRequest, ReplicationJob, ReplicationMode, RunSummary};
pub use source::{PostgresSource, SourceExtractor};
pub use staging::{ObjectStoreStaging, StagedFileRef, StagingStore};
pub use warehouse::{RedshiftLoader, TargetLoader};
