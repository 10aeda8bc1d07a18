//! End-to-end orchestration tests over a scripted transport.
//!
//! No live network: a [`ScriptedTransport`] plays back canned submit
//! and poll responses while counting calls, so the tests pin down the
//! poller's state machine and the fail-safe decoding contract.

use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{Rgb, RgbImage};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

use fluxbridge_bfl::api::{BflApiError, FluxTransport, JobHandle, PollResult};
use fluxbridge_bfl::decode::decode_bytes;
use fluxbridge_bfl::orchestrator::{run_job, run_job_with_policy, JobArtifact};
use fluxbridge_bfl::poller::{self, PollPolicy, JobTerminal};
use fluxbridge_bfl::request;
use fluxbridge_core::params::{
    FinetuneParams, GenerateParams, InferenceParams, JobParams, OutputFormat,
};
use fluxbridge_core::tensor::{ImageTensor, CHANNELS, PLACEHOLDER_SIZE};

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// A poll script entry: a mapped poll result, or an HTTP-level failure.
type PollScript = Result<PollResult, (u16, String)>;

/// Plays back canned responses and counts calls.
struct ScriptedTransport {
    /// `None` means submit succeeds with [`Self::submit_id`].
    submit_error: Option<(u16, String)>,
    submit_id: String,
    polls: Mutex<VecDeque<PollScript>>,
    /// Bytes served for any `fetch_sample` call, unless `fetch_error`.
    fetch_bytes: Option<Vec<u8>>,
    fetch_error: Option<(u16, String)>,
    submit_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl ScriptedTransport {
    fn with_polls(polls: Vec<PollScript>) -> Self {
        Self {
            submit_error: None,
            submit_id: "job-1".to_string(),
            polls: Mutex::new(polls.into()),
            fetch_bytes: None,
            fetch_error: None,
            submit_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    fn failing_submit(status: u16, body: &str) -> Self {
        Self {
            submit_error: Some((status, body.to_string())),
            ..Self::with_polls(Vec::new())
        }
    }

    fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FluxTransport for ScriptedTransport {
    async fn submit(&self, request: &request::JobRequest) -> Result<JobHandle, BflApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        match &self.submit_error {
            Some((status, body)) => Err(BflApiError::Api {
                status: *status,
                body: body.clone(),
            }),
            None => Ok(JobHandle {
                id: self.submit_id.clone(),
                kind: request.kind,
                submitted_at: chrono::Utc::now(),
            }),
        }
    }

    async fn poll(&self, _handle: &JobHandle) -> Result<PollResult, BflApiError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        match self.polls.lock().unwrap().pop_front() {
            Some(Ok(result)) => Ok(result),
            Some(Err((status, body))) => Err(BflApiError::Api { status, body }),
            // Script exhausted: stay pending forever.
            None => Ok(PollResult::Pending),
        }
    }

    async fn fetch_sample(&self, _url: &str) -> Result<Vec<u8>, BflApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((status, body)) = &self.fetch_error {
            return Err(BflApiError::Api {
                status: *status,
                body: body.clone(),
            });
        }
        Ok(self.fetch_bytes.clone().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn generate_params() -> JobParams {
    JobParams::Generate(GenerateParams {
        prompt: "a lighthouse at dusk".to_string(),
        aspect_ratio: "1:1".to_string(),
        safety_tolerance: 2,
        output_format: OutputFormat::Jpeg,
        seed: 42,
        ultra: false,
        raw: false,
    })
}

fn fast_policy() -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(500),
        max_wait: Duration::from_secs(60),
        max_transport_retries: 3,
    }
}

fn png_sample() -> Vec<u8> {
    let mut img = RgbImage::new(4, 4);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        *pixel = Rgb([(x * 50) as u8, (y * 50) as u8, 128]);
    }
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn ready_with_inline(bytes: &[u8]) -> PollResult {
    PollResult::Succeeded(json!({ "sample": BASE64.encode(bytes) }))
}

fn ready_with_url(url: &str) -> PollResult {
    PollResult::Succeeded(json!({ "sample": url }))
}

/// Write a ZIP of `count` dummy jpg entries and return its path.
fn training_archive(dir: &tempfile::TempDir, count: usize) -> PathBuf {
    let path = dir.path().join("training.zip");
    let file = std::fs::File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for i in 0..count {
        writer
            .start_file(format!("img_{i:02}.jpg"), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"not really pixels").unwrap();
    }
    writer.finish().unwrap();
    path
}

fn finetune_params(archive_path: PathBuf) -> JobParams {
    JobParams::Finetune(FinetuneParams {
        archive_path,
        comment: "character set v2".to_string(),
        ..Default::default()
    })
}

// ---------------------------------------------------------------------------
// Poller state machine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_failure_is_terminal_with_zero_polls() {
    let transport = ScriptedTransport::failing_submit(500, "internal error");
    let request = request::build(&generate_params()).unwrap();

    let terminal = poller::run_to_terminal(
        &transport,
        &request,
        &fast_policy(),
        &CancellationToken::new(),
    )
    .await;

    assert_matches!(
        terminal,
        JobTerminal::Failed { reason } if reason.contains("submit failed")
    );
    assert_eq!(transport.poll_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn pending_pending_succeeded_polls_exactly_three_times() {
    let transport = ScriptedTransport::with_polls(vec![
        Ok(PollResult::Pending),
        Ok(PollResult::Pending),
        Ok(PollResult::Succeeded(Value::Null)),
    ]);
    let request = request::build(&generate_params()).unwrap();

    let terminal = poller::run_to_terminal(
        &transport,
        &request,
        &fast_policy(),
        &CancellationToken::new(),
    )
    .await;

    assert_matches!(terminal, JobTerminal::Succeeded { id, .. } if id == "job-1");
    assert_eq!(transport.poll_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn endless_pending_times_out_at_max_wait() {
    // The script is empty, so every poll reports Pending.
    let transport = ScriptedTransport::with_polls(Vec::new());
    let request = request::build(&generate_params()).unwrap();
    let policy = PollPolicy {
        interval: Duration::from_secs(1),
        max_wait: Duration::from_secs(10),
        max_transport_retries: 3,
    };

    let terminal =
        poller::run_to_terminal(&transport, &request, &policy, &CancellationToken::new()).await;

    assert_matches!(
        terminal,
        JobTerminal::TimedOut { waited } if waited >= policy.max_wait
    );
    // One poll per interval until the deadline passes.
    assert!(transport.poll_calls() >= 10 && transport.poll_calls() <= 12);
}

#[tokio::test(start_paused = true)]
async fn repeated_transport_errors_exhaust_retries() {
    let transport = ScriptedTransport::with_polls(vec![
        Err((502, "bad gateway".to_string())),
        Err((502, "bad gateway".to_string())),
        Err((502, "bad gateway".to_string())),
        Err((502, "bad gateway".to_string())),
    ]);
    let request = request::build(&generate_params()).unwrap();

    let terminal = poller::run_to_terminal(
        &transport,
        &request,
        &fast_policy(),
        &CancellationToken::new(),
    )
    .await;

    assert_matches!(
        terminal,
        JobTerminal::Failed { reason } if reason.contains("poll failed after 4 attempts")
    );
    assert_eq!(transport.poll_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn transport_error_recovery_resets_the_retry_budget() {
    let transport = ScriptedTransport::with_polls(vec![
        Err((502, "bad gateway".to_string())),
        Ok(PollResult::Pending),
        Err((502, "bad gateway".to_string())),
        Ok(PollResult::Succeeded(Value::Null)),
    ]);
    let request = request::build(&generate_params()).unwrap();

    let terminal = poller::run_to_terminal(
        &transport,
        &request,
        &fast_policy(),
        &CancellationToken::new(),
    )
    .await;

    assert_matches!(terminal, JobTerminal::Succeeded { .. });
    assert_eq!(transport.poll_calls(), 4);
}

#[tokio::test]
async fn pre_cancelled_token_fails_before_any_poll() {
    let transport = ScriptedTransport::with_polls(Vec::new());
    let request = request::build(&generate_params()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let terminal = poller::run_to_terminal(&transport, &request, &fast_policy(), &cancel).await;

    assert_matches!(terminal, JobTerminal::Failed { reason } if reason == "cancelled");
    assert_eq!(transport.poll_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_the_inter_poll_delay() {
    let transport = ScriptedTransport::with_polls(Vec::new());
    let request = request::build(&generate_params()).unwrap();
    // An interval long enough that only cancellation can end the test.
    let policy = PollPolicy {
        interval: Duration::from_secs(3600),
        max_wait: Duration::from_secs(7200),
        max_transport_retries: 3,
    };

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let terminal = poller::run_to_terminal(&transport, &request, &policy, &cancel).await;

    assert_matches!(terminal, JobTerminal::Failed { reason } if reason == "cancelled");
    assert_eq!(transport.poll_calls(), 1);
}

// ---------------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generate_with_inline_sample_decodes_without_fetching() {
    let bytes = png_sample();
    let transport = ScriptedTransport::with_polls(vec![Ok(ready_with_inline(&bytes))]);
    let cancel = CancellationToken::new();

    let artifact = run_job_with_policy(&transport, &generate_params(), &fast_policy(), &cancel)
        .await
        .unwrap();

    let outcome = assert_matches!(artifact, JobArtifact::Image(outcome) => outcome);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.image, decode_bytes(&bytes).unwrap());
    assert_eq!(transport.fetch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn generate_with_url_sample_fetches_once() {
    let bytes = png_sample();
    let mut transport =
        ScriptedTransport::with_polls(vec![Ok(ready_with_url("https://delivery.example/s.png"))]);
    transport.fetch_bytes = Some(bytes.clone());
    let cancel = CancellationToken::new();

    let artifact = run_job_with_policy(&transport, &generate_params(), &fast_policy(), &cancel)
        .await
        .unwrap();

    let outcome = assert_matches!(artifact, JobArtifact::Image(outcome) => outcome);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.image, decode_bytes(&bytes).unwrap());
    assert_eq!(transport.fetch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn inference_submit_404_degrades_to_placeholder_with_status() {
    let transport = ScriptedTransport::failing_submit(404, "finetune not found");
    let params = JobParams::Inference(InferenceParams {
        finetune_id: "ft-does-not-exist".to_string(),
        finetune_strength: 1.2,
        generate: GenerateParams {
            prompt: "portrait of TOK".to_string(),
            ..Default::default()
        },
    });
    let cancel = CancellationToken::new();

    let artifact = run_job_with_policy(&transport, &params, &fast_policy(), &cancel)
        .await
        .unwrap();

    let outcome = assert_matches!(artifact, JobArtifact::Image(outcome) => outcome);
    assert_eq!(
        outcome.image.shape(),
        (PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, CHANNELS)
    );
    assert!(outcome.error.unwrap().contains("404"));
    assert_eq!(transport.poll_calls(), 0);
}

#[tokio::test]
async fn finetune_with_undersized_archive_never_reaches_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let params = finetune_params(training_archive(&dir, 3));
    let transport = ScriptedTransport::with_polls(Vec::new());
    let cancel = CancellationToken::new();

    let err = run_job(&transport, &params, &cancel).await.unwrap_err();

    assert_eq!(err.field, "finetune_zip");
    assert_eq!(transport.submit_calls.load(Ordering::SeqCst), 0);
    assert_eq!(transport.poll_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn finetune_success_yields_the_job_id() {
    let dir = tempfile::tempdir().unwrap();
    let params = finetune_params(training_archive(&dir, 5));
    let mut transport = ScriptedTransport::with_polls(vec![
        Ok(PollResult::Pending),
        Ok(PollResult::Succeeded(Value::Null)),
    ]);
    transport.submit_id = "ft-91ee2c".to_string();
    let cancel = CancellationToken::new();

    let artifact = run_job(&transport, &params, &cancel).await.unwrap();

    assert_matches!(artifact, JobArtifact::Finetune(Ok(id)) if id == "ft-91ee2c");
}

#[tokio::test(start_paused = true)]
async fn finetune_failure_yields_the_reason() {
    let dir = tempfile::tempdir().unwrap();
    let params = finetune_params(training_archive(&dir, 5));
    let transport = ScriptedTransport::with_polls(vec![Ok(PollResult::Failed(
        "job failed with status: Error".to_string(),
    ))]);
    let cancel = CancellationToken::new();

    let artifact = run_job(&transport, &params, &cancel).await.unwrap();

    assert_matches!(
        artifact,
        JobArtifact::Finetune(Err(reason)) if reason.contains("Error")
    );
}

// ---------------------------------------------------------------------------
// Failure-path shape invariant
// ---------------------------------------------------------------------------

/// Every failure cause must produce the identical fallback shape.
#[tokio::test(start_paused = true)]
async fn all_failure_paths_share_the_placeholder_shape() {
    let cancel = CancellationToken::new();
    let mut outcomes = Vec::new();

    // Transport errors exhaust the retry budget during polling.
    let transport = ScriptedTransport::with_polls(vec![
        Err((502, "bad gateway".to_string())),
        Err((502, "bad gateway".to_string())),
        Err((502, "bad gateway".to_string())),
        Err((502, "bad gateway".to_string())),
    ]);
    let artifact = run_job_with_policy(&transport, &generate_params(), &fast_policy(), &cancel)
        .await
        .unwrap();
    outcomes.push(assert_matches!(artifact, JobArtifact::Image(o) => o));

    // The success payload is not a decodable image.
    let transport =
        ScriptedTransport::with_polls(vec![Ok(ready_with_inline(b"these are not pixels"))]);
    let artifact = run_job_with_policy(&transport, &generate_params(), &fast_policy(), &cancel)
        .await
        .unwrap();
    outcomes.push(assert_matches!(artifact, JobArtifact::Image(o) => o));

    // The job never leaves Pending.
    let transport = ScriptedTransport::with_polls(Vec::new());
    let policy = PollPolicy {
        interval: Duration::from_secs(1),
        max_wait: Duration::from_secs(5),
        max_transport_retries: 3,
    };
    let artifact = run_job_with_policy(&transport, &generate_params(), &policy, &cancel)
        .await
        .unwrap();
    outcomes.push(assert_matches!(artifact, JobArtifact::Image(o) => o));

    for outcome in outcomes {
        assert_eq!(outcome.image, ImageTensor::placeholder());
        assert_eq!(
            outcome.image.shape(),
            (PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, CHANNELS)
        );
        assert!(outcome.error.is_some());
    }
}

#[tokio::test]
async fn sample_fetch_failure_degrades_to_placeholder() {
    let mut transport =
        ScriptedTransport::with_polls(vec![Ok(ready_with_url("https://delivery.example/s.png"))]);
    transport.fetch_error = Some((502, "bad gateway".to_string()));
    let cancel = CancellationToken::new();

    let artifact = run_job_with_policy(&transport, &generate_params(), &fast_policy(), &cancel)
        .await
        .unwrap();

    let outcome = assert_matches!(artifact, JobArtifact::Image(outcome) => outcome);
    assert_eq!(outcome.image, ImageTensor::placeholder());
    assert!(outcome.error.unwrap().contains("502"));
}
