use serde_json::{Map, Value};

/// One source row: column name to value. Column order is the source's ordinal order.
pub type Row = Map<String, Value>;

/// A block of rows produced by one extraction call.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    /// Zero-based, unique within a run.
    pub number: usize,
    pub rows: Vec<Row>,
}

impl Batch {
    pub fn new(number: usize, rows: Vec<Row>) -> Self {
        Batch { number, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in the order of the first row's keys.
    pub fn columns(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Canonical text form of a value: `None` for null, compact JSON for nested values.
/// Numbers keep the digits they were read with.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
