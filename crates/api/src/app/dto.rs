//! Request bodies, path parsing and response envelopes.

use std::str::FromStr;

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::Response;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use applyflow_batches::{Batch, CompletionStatus};
use applyflow_core::BatchId;

use crate::app::errors::json_error;

/// `PATCH /application-batches/:id/tasks/:taskId`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskRequest {
    pub status: CompletionStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// `POST /application-batches/:id/retry-failed`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryFailedRequest {
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEnvelope {
    pub batch: Batch,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestBatchEnvelope {
    pub batch: Option<Batch>,
}

/// Parse a JSON body; an empty body yields `T::default()`.
pub fn parse_optional_body<T>(body: &Bytes) -> Result<T, Response>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}

pub fn parse_body<T>(body: &Bytes) -> Result<T, Response>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(body)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "INVALID_BODY", e.to_string()))
}

/// Parse a path id, mapping failures to `INVALID_PARAMS`.
pub fn parse_id<T>(raw: &str) -> Result<T, Response>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| json_error(StatusCode::BAD_REQUEST, "INVALID_PARAMS", e.to_string()))
}

pub fn parse_batch_id(raw: &str) -> Result<BatchId, Response> {
    parse_id(raw)
}
