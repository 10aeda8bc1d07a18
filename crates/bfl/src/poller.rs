//! The bounded submit-and-poll loop.
//!
//! Drives a job from submission to one of three terminal states:
//! succeeded, failed, or timed out. The loop always terminates within
//! the policy's maximum wait, a cancellation signal is honored between
//! poll attempts, and a terminal state never issues further polls.

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use fluxbridge_core::params::JobKind;

use crate::api::{FluxTransport, JobHandle, PollResult};
use crate::request::JobRequest;

/// Default inter-poll delay for generation and inference jobs.
pub const GENERATE_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Default maximum wait for generation and inference jobs.
pub const GENERATE_MAX_WAIT: Duration = Duration::from_secs(5 * 60);
/// Default inter-poll delay for finetune jobs, which run much longer.
pub const FINETUNE_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Default maximum wait for finetune jobs.
pub const FINETUNE_MAX_WAIT: Duration = Duration::from_secs(6 * 60 * 60);
/// Consecutive transport failures tolerated during polling.
pub const DEFAULT_TRANSPORT_RETRIES: u32 = 3;

/// Tunable parameters for one polling run.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay between consecutive poll attempts.
    pub interval: Duration,
    /// Hard ceiling on time since submission before declaring timeout.
    pub max_wait: Duration,
    /// Consecutive poll transport failures tolerated before the job is
    /// declared failed. A successful poll resets the count.
    pub max_transport_retries: u32,
}

impl PollPolicy {
    /// Default policy for a job kind. Generation completes in seconds;
    /// finetuning can take hours.
    pub fn for_kind(kind: JobKind) -> Self {
        match kind {
            JobKind::Generate | JobKind::Inference => Self {
                interval: GENERATE_POLL_INTERVAL,
                max_wait: GENERATE_MAX_WAIT,
                max_transport_retries: DEFAULT_TRANSPORT_RETRIES,
            },
            JobKind::Finetune => Self {
                interval: FINETUNE_POLL_INTERVAL,
                max_wait: FINETUNE_MAX_WAIT,
                max_transport_retries: DEFAULT_TRANSPORT_RETRIES,
            },
        }
    }
}

/// Terminal classification of one driven job.
#[derive(Debug, Clone)]
pub enum JobTerminal {
    /// The service reported the job ready. Carries the job id and the
    /// raw result object for the decoder.
    Succeeded { id: String, result: Value },
    /// The job failed, was cancelled, or could not be submitted.
    Failed { reason: String },
    /// `max_wait` elapsed without a terminal answer from the service.
    TimedOut { waited: Duration },
}

/// Submit a job and poll it to a terminal state.
///
/// A submit failure is terminal immediately: no poll calls are issued
/// because there is no handle to poll.
pub async fn run_to_terminal(
    transport: &dyn FluxTransport,
    request: &JobRequest,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> JobTerminal {
    let handle = match transport.submit(request).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(endpoint = request.endpoint, error = %e, "Job submission failed");
            return JobTerminal::Failed {
                reason: format!("submit failed: {e}"),
            };
        }
    };

    poll_to_terminal(transport, &handle, policy, cancel).await
}

/// Poll an already-submitted job until it reaches a terminal state.
pub async fn poll_to_terminal(
    transport: &dyn FluxTransport,
    handle: &JobHandle,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> JobTerminal {
    let started = tokio::time::Instant::now();
    let mut consecutive_failures = 0u32;

    tracing::debug!(
        job_id = %handle.id,
        kind = ?handle.kind,
        submitted_at = %handle.submitted_at,
        interval_ms = policy.interval.as_millis() as u64,
        max_wait_secs = policy.max_wait.as_secs(),
        "Polling for result",
    );

    loop {
        if cancel.is_cancelled() {
            tracing::info!(job_id = %handle.id, "Polling cancelled");
            return JobTerminal::Failed {
                reason: "cancelled".to_string(),
            };
        }
        if started.elapsed() > policy.max_wait {
            tracing::warn!(
                job_id = %handle.id,
                waited_secs = started.elapsed().as_secs(),
                "Job timed out",
            );
            return JobTerminal::TimedOut {
                waited: started.elapsed(),
            };
        }

        match transport.poll(handle).await {
            Ok(PollResult::Pending) => {
                consecutive_failures = 0;
                tracing::debug!(job_id = %handle.id, "Result not ready yet");
            }
            Ok(PollResult::Succeeded(result)) => {
                tracing::info!(
                    job_id = %handle.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job succeeded",
                );
                return JobTerminal::Succeeded {
                    id: handle.id.clone(),
                    result,
                };
            }
            Ok(PollResult::Failed(reason)) => {
                tracing::warn!(job_id = %handle.id, reason = %reason, "Job failed");
                return JobTerminal::Failed { reason };
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures > policy.max_transport_retries {
                    tracing::error!(
                        job_id = %handle.id,
                        error = %e,
                        attempts = consecutive_failures,
                        "Giving up polling after repeated transport failures",
                    );
                    return JobTerminal::Failed {
                        reason: format!("poll failed after {consecutive_failures} attempts: {e}"),
                    };
                }
                tracing::warn!(
                    job_id = %handle.id,
                    error = %e,
                    attempt = consecutive_failures,
                    "Poll call failed, will retry",
                );
            }
        }

        // Wait out the inter-poll delay, reacting to cancellation
        // immediately rather than at the next loop iteration.
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(job_id = %handle.id, "Polling cancelled");
                return JobTerminal::Failed {
                    reason: "cancelled".to_string(),
                };
            }
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}
