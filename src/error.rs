// error.rs
// Error taxonomy shared by the engine, the janitor and the collaborators.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplicationError {
    /// A required job or ambient parameter is missing or invalid. The job never starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("table {0} not found in source")]
    NotFound(String),

    /// Connection or authentication failure against any collaborator.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("load error: {0}")]
    Load(String),

    /// A batch could not be written to the staging store.
    #[error("staging error: {0}")]
    Staging(String),

    #[error("codec error: {0}")]
    Codec(String),

    /// Deleting a staged file failed. Never aborts a run or a sweep.
    #[error("cleanup error: {0}")]
    Cleanup(String),
}

pub type Result<T> = std::result::Result<T, ReplicationError>;

impl ReplicationError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ReplicationError::Cleanup(_))
    }
}

impl From<r2d2::Error> for ReplicationError {
    fn from(e: r2d2::Error) -> Self {
        ReplicationError::Connectivity(e.to_string())
    }
}

impl From<csv::Error> for ReplicationError {
    fn from(e: csv::Error) -> Self {
        ReplicationError::Codec(e.to_string())
    }
}

impl From<parquet::errors::ParquetError> for ReplicationError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        ReplicationError::Codec(e.to_string())
    }
}

impl From<arrow_schema::ArrowError> for ReplicationError {
    fn from(e: arrow_schema::ArrowError) -> Self {
        ReplicationError::Codec(e.to_string())
    }
}

/// Classifies a driver error raised while talking to a database: a closed or
/// never-established connection is a connectivity problem, anything else is
/// reported through `otherwise`.
pub(crate) fn classify_pg_error(
    e: postgres::Error,
    otherwise: fn(String) -> ReplicationError,
) -> ReplicationError {
    if e.is_closed() || (e.as_db_error().is_none() && e.to_string().contains("connect")) {
        ReplicationError::Connectivity(e.to_string())
    } else {
        otherwise(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_cleanup_is_non_fatal() {
        assert!(!ReplicationError::Cleanup("gone".into()).is_fatal());
        assert!(ReplicationError::Load("bad row".into()).is_fatal());
        assert!(ReplicationError::NotFound("public.orders".into()).is_fatal());
    }

    #[test]
    fn test_messages_keep_detail() {
        let err = ReplicationError::NotFound("public.orders".into());
        assert_eq!(err.to_string(), "table public.orders not found in source");
    }
}
