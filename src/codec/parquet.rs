// Columnar staging files. The Arrow schema follows the target table's columns, so every
// file staged for a table has the same physical types whatever values a batch holds.
// Without target columns every column is written as text.

use super::DecodedBatch;
use crate::batch::{Batch, value_to_text};
use crate::error::{ReplicationError, Result};
use crate::type_map::{TargetColumn, TargetType};
use arrow_array::builder::StringBuilder;
use arrow_array::cast::AsArray;
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_cast::cast::{CastOptions, cast, cast_with_options};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

/// Physical type a warehouse column is written as.
pub fn arrow_type(data_type: TargetType) -> DataType {
    match data_type {
        TargetType::SmallInt => DataType::Int16,
        TargetType::Integer => DataType::Int32,
        TargetType::BigInt => DataType::Int64,
        TargetType::Numeric => DataType::Decimal128(38, 10),
        TargetType::Real => DataType::Float32,
        TargetType::Double => DataType::Float64,
        TargetType::Boolean => DataType::Boolean,
        TargetType::Date => DataType::Date32,
        TargetType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        TargetType::TimestampTz => {
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
        }
        TargetType::Time | TargetType::Varchar(_) | TargetType::Super => DataType::Utf8,
    }
}

fn schema_for(batch: &Batch, columns: &[TargetColumn]) -> Schema {
    let fields: Vec<Field> = if columns.is_empty() {
        batch
            .columns()
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect()
    } else {
        columns
            .iter()
            .map(|c| Field::new(&c.name, arrow_type(c.data_type), true))
            .collect()
    };
    Schema::new(fields)
}

/// Builds the column as text, then converts it to the field's type. A value that does
/// not convert fails the batch rather than being written as null.
fn build_column(batch: &Batch, field: &Field) -> Result<ArrayRef> {
    let mut builder = StringBuilder::new();
    for row in &batch.rows {
        builder.append_option(row.get(field.name()).and_then(value_to_text));
    }
    let text: ArrayRef = Arc::new(builder.finish());
    if field.data_type() == &DataType::Utf8 {
        return Ok(text);
    }
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    cast_with_options(&text, field.data_type(), &options).map_err(|e| {
        ReplicationError::Codec(format!(
            "column {} as {}: {}",
            field.name(),
            field.data_type(),
            e
        ))
    })
}

pub fn encode(batch: &Batch, columns: &[TargetColumn]) -> Result<Vec<u8>> {
    let schema = Arc::new(schema_for(batch, columns));
    if schema.fields().is_empty() {
        return Ok(Vec::new());
    }
    let arrays = schema
        .fields()
        .iter()
        .map(|field| build_column(batch, field))
        .collect::<Result<Vec<_>>>()?;
    let record_batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))?;
    writer.write(&record_batch)?;
    writer.close()?;
    Ok(buffer)
}

/// Reads a payload written by [`encode`], rendering every cell as text.
pub fn decode(payload: &[u8]) -> Result<DecodedBatch> {
    if payload.is_empty() {
        return Ok(DecodedBatch {
            columns: Vec::new(),
            rows: Vec::new(),
        });
    }
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(payload))?;
    let columns = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let mut rows = Vec::new();
    for record_batch in builder.build()? {
        let record_batch = record_batch?;
        let text = record_batch
            .columns()
            .iter()
            .map(|array| cast(array, &DataType::Utf8))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for index in 0..record_batch.num_rows() {
            rows.push(
                text.iter()
                    .map(|array| {
                        let array = array.as_string::<i32>();
                        (!array.is_null(index)).then(|| array.value(index).to_string())
                    })
                    .collect(),
            );
        }
    }
    Ok(DecodedBatch { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Row;
    use crate::table::ColumnDescriptor;
    use crate::type_map::map_columns;
    use serde_json::{Value, json};

    fn target_columns() -> Vec<TargetColumn> {
        map_columns(&[
            ColumnDescriptor::new("id", "bigint").not_null(),
            ColumnDescriptor::new("amount", "numeric"),
            ColumnDescriptor::new("active", "boolean"),
            ColumnDescriptor::new("updated_at", "timestamp without time zone"),
            ColumnDescriptor::new("details", "jsonb"),
        ])
    }

    fn file_schema(payload: &[u8]) -> Vec<DataType> {
        ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(payload))
            .unwrap()
            .schema()
            .fields()
            .iter()
            .map(|f| f.data_type().clone())
            .collect()
    }

    fn batch(rows: Vec<Value>) -> Batch {
        Batch::new(
            0,
            rows.into_iter()
                .map(|v| v.as_object().unwrap().clone())
                .collect::<Vec<Row>>(),
        )
    }

    #[test]
    fn test_every_batch_gets_the_table_schema() {
        let columns = target_columns();
        let sparse = batch(vec![json!({"id": 1, "amount": null, "active": null, "updated_at": null, "details": null})]);
        let full = batch(vec![json!({
            "id": 2,
            "amount": 10.5,
            "active": true,
            "updated_at": "2024-01-01T00:00:01",
            "details": {"items": [1]},
        })]);
        let expected = vec![
            DataType::Int64,
            DataType::Decimal128(38, 10),
            DataType::Boolean,
            DataType::Timestamp(TimeUnit::Microsecond, None),
            DataType::Utf8,
        ];
        assert_eq!(file_schema(&encode(&sparse, &columns).unwrap()), expected);
        assert_eq!(file_schema(&encode(&full, &columns).unwrap()), expected);
    }

    #[test]
    fn test_numerics_and_timestamps_are_typed() {
        let rows: Vec<Row> = vec![serde_json::from_str(
            r#"{"id": 7, "amount": 12345678901234567.1234567891, "active": false,
                "updated_at": "2024-01-01T00:00:01.5", "details": {"a": 1}}"#,
        )
        .unwrap()];
        let payload = encode(&Batch::new(0, rows), &target_columns()).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(&payload))
            .unwrap()
            .build()
            .unwrap();
        let record_batch = reader.into_iter().next().unwrap().unwrap();
        let micros = record_batch
            .column(3)
            .as_primitive::<arrow_array::types::TimestampMicrosecondType>()
            .value(0);
        assert_eq!(micros, 1_704_067_201_500_000);

        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.rows[0][0].as_deref(), Some("7"));
        assert_eq!(
            decoded.rows[0][1].as_deref(),
            Some("12345678901234567.1234567891")
        );
        assert_eq!(decoded.rows[0][2].as_deref(), Some("false"));
        assert_eq!(decoded.rows[0][4].as_deref(), Some(r#"{"a":1}"#));
        assert!(!record_batch.column(1).is_null(0));
    }

    #[test]
    fn test_unconvertible_value_fails_the_batch() {
        let bad = batch(vec![json!({"id": "not a number"})]);
        assert!(matches!(
            encode(&bad, &target_columns()),
            Err(ReplicationError::Codec(_))
        ));
    }

    #[test]
    fn test_columns_missing_from_rows_are_null() {
        let payload = encode(&batch(vec![json!({"id": 1})]), &target_columns()).unwrap();
        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.columns.len(), 5);
        assert!(decoded.rows[0][1..].iter().all(Option::is_none));
    }
}
