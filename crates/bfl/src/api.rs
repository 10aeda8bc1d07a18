//! REST client for the BFL FLUX HTTP endpoints.
//!
//! Wraps job submission, result polling, and sample download using
//! [`reqwest`]. Every call carries a bounded timeout and the API key
//! as the `x-key` header. This layer never retries -- retry policy
//! lives in the poller.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use fluxbridge_core::config::Credentials;
use fluxbridge_core::params::JobKind;

use crate::request::JobRequest;

/// Per-call timeout applied to every HTTP request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Opaque handle for a submitted job, used for all subsequent polls.
#[derive(Debug, Clone)]
pub struct JobHandle {
    /// Server-assigned job identifier.
    pub id: String,
    pub kind: JobKind,
    pub submitted_at: DateTime<Utc>,
}

/// Outcome of a single poll call.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    /// The job is still running; poll again later.
    Pending,
    /// Terminal success. Carries the raw `result` object from the
    /// service (for image kinds this holds the sample URL or bytes).
    Succeeded(Value),
    /// Terminal failure with a human-readable cause.
    Failed(String),
}

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum BflApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("BFL API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response whose body is missing required fields.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Transport seam over the three HTTP operations an orchestration
/// needs. Implemented by [`BflApi`]; tests substitute a scripted mock.
#[async_trait]
pub trait FluxTransport: Send + Sync {
    /// Submit a job, returning the handle to poll.
    async fn submit(&self, request: &JobRequest) -> Result<JobHandle, BflApiError>;

    /// Ask the service for the current state of a submitted job.
    async fn poll(&self, handle: &JobHandle) -> Result<PollResult, BflApiError>;

    /// Download the bytes behind a sample delivery URL.
    async fn fetch_sample(&self, url: &str) -> Result<Vec<u8>, BflApiError>;
}

/// HTTP client bound to one set of credentials.
pub struct BflApi {
    client: reqwest::Client,
    credentials: Credentials,
}

impl BflApi {
    /// Create a new API client.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
        }
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across orchestrations).
    pub fn with_client(client: reqwest::Client, credentials: Credentials) -> Self {
        Self { client, credentials }
    }

    async fn submit_inner(&self, request: &JobRequest) -> Result<JobHandle, BflApiError> {
        let url = format!("{}/{}", self.credentials.base_url, request.endpoint);

        let response = self
            .client
            .post(&url)
            .header("x-key", &self.credentials.api_key)
            .json(&request.payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let body: Value = Self::parse_response(response).await?;

        // Finetune submissions answer with `finetune_id`; generation
        // and inference answer with `id`. A 2xx body without the id is
        // a submit failure, not a job to poll.
        let id_field = match request.kind {
            JobKind::Finetune => "finetune_id",
            JobKind::Generate | JobKind::Inference => "id",
        };
        let id = body
            .get(id_field)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                BflApiError::Malformed(format!("submit response missing {id_field}"))
            })?;

        tracing::info!(
            kind = ?request.kind,
            endpoint = request.endpoint,
            job_id = %id,
            "Job submitted",
        );

        Ok(JobHandle {
            id: id.to_string(),
            kind: request.kind,
            submitted_at: Utc::now(),
        })
    }

    async fn poll_inner(&self, handle: &JobHandle) -> Result<PollResult, BflApiError> {
        let url = format!("{}/get_result?id={}", self.credentials.base_url, handle.id);

        let response = self
            .client
            .get(&url)
            .header("x-key", &self.credentials.api_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let body: Value = Self::parse_response(response).await?;
        Ok(map_poll_response(&body))
    }

    async fn fetch_sample_inner(&self, url: &str) -> Result<Vec<u8>, BflApiError> {
        let response = self.client.get(url).timeout(REQUEST_TIMEOUT).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`BflApiError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BflApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BflApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BflApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl FluxTransport for BflApi {
    async fn submit(&self, request: &JobRequest) -> Result<JobHandle, BflApiError> {
        self.submit_inner(request).await
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollResult, BflApiError> {
        self.poll_inner(handle).await
    }

    async fn fetch_sample(&self, url: &str) -> Result<Vec<u8>, BflApiError> {
        self.fetch_sample_inner(url).await
    }
}

/// Map a `get_result` response body to a [`PollResult`].
///
/// Unknown status strings map to `Failed` rather than an error, so the
/// polling loop always has a defined next action.
pub fn map_poll_response(body: &Value) -> PollResult {
    let status = body.get("status").and_then(Value::as_str).unwrap_or("");

    match status {
        "Pending" => PollResult::Pending,
        "Ready" => PollResult::Succeeded(body.get("result").cloned().unwrap_or(Value::Null)),
        "Error" | "Request Moderated" | "Content Moderated" | "Task not found" => {
            PollResult::Failed(format!("job failed with status: {status}"))
        }
        other => PollResult::Failed(format!("unknown status: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn pending_status_maps_to_pending() {
        let result = map_poll_response(&json!({ "status": "Pending" }));
        assert_eq!(result, PollResult::Pending);
    }

    #[test]
    fn ready_status_carries_result_object() {
        let body = json!({
            "status": "Ready",
            "result": { "sample": "https://delivery.example.com/img.png" },
        });
        assert_matches!(
            map_poll_response(&body),
            PollResult::Succeeded(result) if result["sample"] == "https://delivery.example.com/img.png"
        );
    }

    #[test]
    fn ready_without_result_still_succeeds() {
        // Finetune results have no sample payload.
        assert_matches!(
            map_poll_response(&json!({ "status": "Ready" })),
            PollResult::Succeeded(Value::Null)
        );
    }

    #[test]
    fn error_status_maps_to_failed() {
        assert_matches!(
            map_poll_response(&json!({ "status": "Error" })),
            PollResult::Failed(reason) if reason.contains("Error")
        );
    }

    #[test]
    fn moderation_statuses_map_to_failed() {
        for status in ["Request Moderated", "Content Moderated", "Task not found"] {
            assert_matches!(
                map_poll_response(&json!({ "status": status })),
                PollResult::Failed(reason) if reason.contains(status)
            );
        }
    }

    #[test]
    fn unknown_status_maps_to_failed_not_panic() {
        assert_matches!(
            map_poll_response(&json!({ "status": "Reticulating" })),
            PollResult::Failed(reason) if reason == "unknown status: Reticulating"
        );
    }

    #[test]
    fn missing_status_maps_to_failed() {
        assert_matches!(
            map_poll_response(&json!({})),
            PollResult::Failed(reason) if reason == "unknown status: "
        );
    }
}
