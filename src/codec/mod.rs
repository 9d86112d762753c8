//! Serialization of batches into staging file payloads.
//!
//! CSV column order is taken from the first row of the batch. Parquet files follow the
//! target table's columns when they are given. A row missing a column encodes a null
//! for it, nulls become empty fields, and nested values are written in their compact
//! JSON form. Encoding is deterministic, so the same batch always yields the same bytes.

pub mod csv;
pub mod parquet;

use crate::batch::Batch;
use crate::error::{ReplicationError, Result};
use crate::type_map::TargetColumn;
use std::fmt;
use std::str::FromStr;

/// Staging file format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FileFormat {
    #[default]
    Csv,
    Parquet,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Parquet => "parquet",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            FileFormat::Csv => "text/csv",
            FileFormat::Parquet => "application/parquet",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FileFormat {
    type Err = ReplicationError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(FileFormat::Csv),
            "parquet" => Ok(FileFormat::Parquet),
            other => Err(ReplicationError::Configuration(format!(
                "unsupported file format: {}",
                other
            ))),
        }
    }
}

/// Rows read back from a staging payload, every value in its canonical text form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// Encodes `batch` for staging. `columns` are the target table's columns; CSV files
/// are positional and do not use them.
pub fn encode(format: FileFormat, batch: &Batch, columns: &[TargetColumn]) -> Result<Vec<u8>> {
    match format {
        FileFormat::Csv => csv::encode(batch),
        FileFormat::Parquet => parquet::encode(batch, columns),
    }
}

pub fn decode(format: FileFormat, payload: &[u8]) -> Result<DecodedBatch> {
    match format {
        FileFormat::Csv => csv::decode(payload),
        FileFormat::Parquet => parquet::decode(payload),
    }
}

/// The text table a batch should decode to: one entry per column of the first row.
pub fn expected_text(batch: &Batch) -> DecodedBatch {
    let columns = batch.columns();
    let rows = batch
        .rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(c).and_then(crate::batch::value_to_text))
                .collect()
        })
        .collect();
    DecodedBatch { columns, rows }
}
