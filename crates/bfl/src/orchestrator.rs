//! The orchestration entry point.
//!
//! Dispatches on job kind: build the request, drive the polling loop
//! to a terminal state, and decode the result. Only validation (and,
//! upstream, credential resolution) can abort the call chain; every
//! failure after submission degrades into the returned artifact.

use tokio_util::sync::CancellationToken;

use fluxbridge_core::params::{JobKind, JobParams, ValidationError};

use crate::api::FluxTransport;
use crate::decode::{self, OrchestrationOutcome};
use crate::poller::{self, JobTerminal, PollPolicy};
use crate::request;

/// Terminal artifact of one orchestration, by job kind.
#[derive(Debug)]
pub enum JobArtifact {
    /// Generate and Inference always yield an image outcome -- a real
    /// image on success, the placeholder plus a reason otherwise.
    Image(OrchestrationOutcome),
    /// Finetune yields the finetune id once the service accepts the
    /// training run, or the failure reason. No image is produced.
    Finetune(Result<String, String>),
}

/// Run one job end to end with the default policy for its kind.
pub async fn run_job(
    transport: &dyn FluxTransport,
    params: &JobParams,
    cancel: &CancellationToken,
) -> Result<JobArtifact, ValidationError> {
    let policy = PollPolicy::for_kind(params.kind());
    run_job_with_policy(transport, params, &policy, cancel).await
}

/// Same as [`run_job`] with an explicit poll policy.
pub async fn run_job_with_policy(
    transport: &dyn FluxTransport,
    params: &JobParams,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<JobArtifact, ValidationError> {
    let request = request::build(params)?;
    let terminal = poller::run_to_terminal(transport, &request, policy, cancel).await;

    let artifact = match request.kind {
        JobKind::Generate | JobKind::Inference => {
            JobArtifact::Image(decode::decode_terminal(transport, terminal).await)
        }
        JobKind::Finetune => JobArtifact::Finetune(match terminal {
            JobTerminal::Succeeded { id, .. } => Ok(id),
            JobTerminal::Failed { reason } => Err(reason),
            JobTerminal::TimedOut { waited } => {
                Err(format!("finetune timed out after {}s", waited.as_secs()))
            }
        }),
    };

    Ok(artifact)
}
