// src/envelope.rs
// Response envelope returned to whatever triggered a run.

use crate::job::RunSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Display;

pub const STATUS_OK: u16 = 200;
pub const STATUS_ERROR: u16 = 500;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response<T> {
    pub status_code: u16,
    pub correlation_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Response<T> {
    pub fn ok(correlation_id: &str, message: &str, result: T) -> Self {
        Response {
            status_code: STATUS_OK,
            correlation_id: correlation_id.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(correlation_id: &str, message: &str, error: impl Display) -> Self {
        Response {
            status_code: STATUS_ERROR,
            correlation_id: correlation_id.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            result: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }
}

impl Response<RunSummary> {
    /// A summary whose staged files all failed is a failed run. The summary is kept
    /// as the result so the caller still sees which files to retry.
    pub fn from_summary(correlation_id: &str, summary: RunSummary) -> Self {
        if summary.success {
            Response::ok(correlation_id, "replication completed", summary)
        } else {
            let error = format!(
                "all {} staged files failed to load: {}",
                summary.failed_files.len(),
                summary.failed_files.join(", ")
            );
            Response {
                result: Some(summary),
                ..Response::failed(correlation_id, "replication failed", error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplicationError;

    #[test]
    fn test_success_carries_result_and_no_error() {
        let summary = RunSummary {
            success: true,
            rows_replicated: 3,
            ..Default::default()
        };
        let response = Response::from_summary("cid", summary);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["statusCode"], 200);
        assert_eq!(value["correlationId"], "cid");
        assert_eq!(value["result"]["rowsReplicated"], 3);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failure_carries_error_and_no_result() {
        let response: Response<RunSummary> = Response::failed(
            "cid",
            "replication failed",
            ReplicationError::NotFound("public.orders".into()),
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["statusCode"], 500);
        assert_eq!(value["error"], "table public.orders not found in source");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_all_files_failed_becomes_error() {
        let summary = RunSummary {
            success: false,
            failed_files: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let response = Response::from_summary("cid", summary);
        assert!(!response.is_success());
        assert_eq!(
            response.error.as_deref(),
            Some("all 2 staged files failed to load: a, b")
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["statusCode"], 500);
        assert_eq!(value["result"]["failedFiles"], serde_json::json!(["a", "b"]));
    }
}
