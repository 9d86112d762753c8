// Delimited-text staging files: a header row followed by one record per row.

use super::DecodedBatch;
use crate::batch::{Batch, value_to_text};
use crate::error::{ReplicationError, Result};

pub fn encode(batch: &Batch) -> Result<Vec<u8>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    let columns = batch.columns();
    let mut writer = ::csv::WriterBuilder::new()
        .quote_style(::csv::QuoteStyle::Necessary)
        .from_writer(Vec::new());
    writer.write_record(&columns)?;
    for row in &batch.rows {
        let fields = columns
            .iter()
            .map(|c| row.get(c).and_then(value_to_text).unwrap_or_default());
        writer.write_record(fields)?;
    }
    writer
        .into_inner()
        .map_err(|e| ReplicationError::Codec(e.to_string()))
}

/// Reads a payload written by [`encode`]. Empty fields read back as `None`.
pub fn decode(payload: &[u8]) -> Result<DecodedBatch> {
    if payload.is_empty() {
        return Ok(DecodedBatch {
            columns: Vec::new(),
            rows: Vec::new(),
        });
    }
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(payload);
    let columns = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|field| (!field.is_empty()).then(|| field.to_string()))
                .collect(),
        );
    }
    Ok(DecodedBatch { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nulls_and_nested_values() {
        let row = json!({"id": 7, "payload": {"a": [1, null]}, "gone": null});
        let batch = Batch::new(0, vec![row.as_object().unwrap().clone()]);
        let text = String::from_utf8(encode(&batch).unwrap()).unwrap();
        assert_eq!(text, "id,payload,gone\n7,\"{\"\"a\"\":[1,null]}\",\n");
    }

    #[test]
    fn test_empty_batch_encodes_to_nothing() {
        assert!(encode(&Batch::new(0, Vec::new())).unwrap().is_empty());
        assert!(decode(b"").unwrap().rows.is_empty());
    }
}
