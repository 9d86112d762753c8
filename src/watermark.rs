// src/watermark.rs
// Ordering of incremental-column values and the running maximum over batches.

use crate::batch::Row;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};
use std::cmp::Ordering;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

enum Temporal {
    Instant(i64, u32),
    Naive(NaiveDateTime),
    Date(NaiveDate),
}

fn parse_temporal(s: &str) -> Option<Temporal> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        let utc = ts.to_utc();
        return Some(Temporal::Instant(utc.timestamp(), utc.timestamp_subsec_nanos()));
    }
    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Temporal::Naive(ts));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(Temporal::Date)
}

/// Plain decimal notation split into sign, integer digits without leading zeros and
/// fraction digits without trailing zeros.
struct Decimal<'a> {
    negative: bool,
    int: &'a str,
    frac: &'a str,
}

impl<'a> Decimal<'a> {
    fn parse(text: &'a str) -> Option<Self> {
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (int, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if int.is_empty() || !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        let int = int.trim_start_matches('0');
        let frac = frac.trim_end_matches('0');
        Some(Decimal {
            negative: negative && !(int.is_empty() && frac.is_empty()),
            int,
            frac,
        })
    }

    fn magnitude_cmp(&self, other: &Decimal<'_>) -> Ordering {
        self.int
            .len()
            .cmp(&other.int.len())
            .then_with(|| self.int.cmp(other.int))
            .then_with(|| self.frac.cmp(other.frac))
    }

    fn cmp(&self, other: &Decimal<'_>) -> Ordering {
        match (self.negative, other.negative) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => self.magnitude_cmp(other),
            (true, true) => other.magnitude_cmp(self),
        }
    }
}

/// Exact comparison for numbers written in plain decimal notation, which is how the
/// source renders integers and numerics of any width.
fn compare_numbers(x: &Number, y: &Number) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        return Some(x.cmp(&y));
    }
    let (xs, ys) = (x.to_string(), y.to_string());
    match (Decimal::parse(&xs), Decimal::parse(&ys)) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
    }
}

/// Compares two incremental-column values. Numbers compare numerically, strings that
/// both parse as the same kind of timestamp or date compare chronologically, other
/// strings lexically. Values of different kinds (or nulls) are incomparable.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => {
            match (parse_temporal(x), parse_temporal(y)) {
                (Some(Temporal::Instant(xs, xn)), Some(Temporal::Instant(ys, yn))) => {
                    Some((xs, xn).cmp(&(ys, yn)))
                }
                (Some(Temporal::Naive(tx)), Some(Temporal::Naive(ty))) => Some(tx.cmp(&ty)),
                (Some(Temporal::Date(dx)), Some(Temporal::Date(dy))) => Some(dx.cmp(&dy)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Highest non-null value of `column` in `rows`, or `None` when every value is null
/// or absent.
pub fn batch_max(rows: &[Row], column: &str) -> Option<Value> {
    let mut max: Option<&Value> = None;
    for value in rows.iter().filter_map(|row| row.get(column)) {
        if value.is_null() {
            continue;
        }
        max = match max {
            Some(current) if compare(value, current) != Some(Ordering::Greater) => Some(current),
            _ => Some(value),
        };
    }
    max.cloned()
}

/// Returns the later of the current watermark and a candidate. A candidate that
/// cannot be compared with the current watermark never replaces it.
pub fn advance(current: Option<Value>, candidate: Option<Value>) -> Option<Value> {
    match (current, candidate) {
        (None, candidate) => candidate,
        (current, None) => current,
        (Some(current), Some(candidate)) => match compare(&candidate, &current) {
            Some(Ordering::Greater) => Some(candidate),
            Some(_) => Some(current),
            None => {
                tracing::warn!(
                    current = %current,
                    candidate = %candidate,
                    "incremental values are not comparable, keeping current watermark"
                );
                Some(current)
            }
        },
    }
}
