//! Terminal-result decoding.
//!
//! Converts a job's terminal state into the outcome the host receives.
//! Decoding is fail-safe by construction: the outer entry point never
//! fails, it degrades every failure cause into the fixed placeholder
//! tensor plus a reason string. The inner fallible path is kept
//! separate so tests can exercise it without fabricating placeholders.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;

use fluxbridge_core::tensor::ImageTensor;

use crate::api::{BflApiError, FluxTransport};
use crate::poller::JobTerminal;

/// Errors on the fallible decode path. All of them collapse to the
/// placeholder outcome at the [`decode_terminal`] boundary.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The terminal result object has no usable `sample` field.
    #[error("result payload missing sample")]
    MissingSample,

    /// The sample string is neither a URL nor decodable base64 data.
    #[error("sample is neither a URL nor base64 image data")]
    UnrecognizedSample,

    /// Downloading the sample from its delivery URL failed.
    #[error("sample download failed: {0}")]
    Fetch(#[from] BflApiError),

    /// The sample bytes are not a decodable image.
    #[error("image decoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Where a completed job's image bytes live.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplePayload {
    /// Bytes must be downloaded from this delivery URL.
    Url(String),
    /// Bytes arrived inline (base64) in the poll response.
    Inline(Vec<u8>),
}

/// What the host ultimately receives: always an image, plus the
/// failure reason whenever that image is the fallback placeholder.
#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    pub image: ImageTensor,
    pub error: Option<String>,
}

impl OrchestrationOutcome {
    pub fn success(image: ImageTensor) -> Self {
        Self { image, error: None }
    }

    /// The fixed-shape placeholder plus a reason. Every failure path
    /// funnels through here, so the shape contract holds regardless of
    /// the cause.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            image: ImageTensor::placeholder(),
            error: Some(reason.into()),
        }
    }
}

/// Decode a terminal state into the host-facing outcome. Total: never
/// fails outward.
pub async fn decode_terminal(
    transport: &dyn FluxTransport,
    terminal: JobTerminal,
) -> OrchestrationOutcome {
    match terminal {
        JobTerminal::Succeeded { id, result } => {
            match decode_result(transport, &result).await {
                Ok(image) => OrchestrationOutcome::success(image),
                Err(e) => {
                    tracing::warn!(
                        job_id = %id,
                        error = %e,
                        "Result decoding failed, returning placeholder",
                    );
                    OrchestrationOutcome::fallback(e.to_string())
                }
            }
        }
        JobTerminal::Failed { reason } => OrchestrationOutcome::fallback(reason),
        JobTerminal::TimedOut { waited } => {
            OrchestrationOutcome::fallback(format!("timed out after {}s", waited.as_secs()))
        }
    }
}

/// Fallible inner path: locate the sample, fetch it if remote, decode.
async fn decode_result(
    transport: &dyn FluxTransport,
    result: &Value,
) -> Result<ImageTensor, DecodeError> {
    let bytes = match extract_sample(result)? {
        SamplePayload::Url(url) => transport.fetch_sample(&url).await?,
        SamplePayload::Inline(bytes) => bytes,
    };
    decode_bytes(&bytes)
}

/// Pull the sample reference out of a terminal result object.
pub fn extract_sample(result: &Value) -> Result<SamplePayload, DecodeError> {
    let sample = result
        .get("sample")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(DecodeError::MissingSample)?;

    if sample.starts_with("http://") || sample.starts_with("https://") {
        return Ok(SamplePayload::Url(sample.to_string()));
    }

    // Inline samples arrive as bare base64 or a `data:image/...;base64,`
    // URL; strip the prefix if present.
    let encoded = sample
        .rsplit_once("base64,")
        .map(|(_, tail)| tail)
        .unwrap_or(sample);
    BASE64
        .decode(encoded.trim())
        .map(SamplePayload::Inline)
        .map_err(|_| DecodeError::UnrecognizedSample)
}

/// Decode image bytes into the internal tensor representation.
pub fn decode_bytes(bytes: &[u8]) -> Result<ImageTensor, DecodeError> {
    let decoded = image::load_from_memory(bytes)?;
    Ok(ImageTensor::from_rgb8(&decoded.to_rgb8()))
}
