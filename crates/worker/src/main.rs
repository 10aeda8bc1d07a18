//! One-shot job runner.
//!
//! Resolves credentials, builds a job from `FLUX_*` environment
//! variables, runs a single orchestration, and logs the outcome.
//! Serves as the operational entry point and as a reference for host
//! frameworks embedding the library crates directly.

use std::env;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fluxbridge_bfl::api::BflApi;
use fluxbridge_bfl::orchestrator::{run_job, JobArtifact};
use fluxbridge_core::config::Credentials;
use fluxbridge_core::params::{
    FinetuneMode, FinetuneParams, FinetuneType, GenerateParams, InferenceParams, JobParams,
    OutputFormat, Priority,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fluxbridge_worker=info,fluxbridge_bfl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let credentials = Credentials::from_env().context("resolving API credentials")?;
    let params = params_from_env()?;
    let api = BflApi::new(credentials);

    // Ctrl-C flips the token so a stuck remote job cannot wedge the
    // process; the poller reacts between attempts.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling job");
            signal_cancel.cancel();
        }
    });

    match run_job(&api, &params, &cancel).await? {
        JobArtifact::Image(outcome) => {
            let (height, width, channels) = outcome.image.shape();
            match outcome.error {
                None => tracing::info!(height, width, channels, "Image ready"),
                Some(error) => {
                    tracing::warn!(height, width, channels, error = %error, "Placeholder returned")
                }
            }
        }
        JobArtifact::Finetune(Ok(id)) => tracing::info!(finetune_id = %id, "Finetune accepted"),
        JobArtifact::Finetune(Err(error)) => tracing::warn!(error = %error, "Finetune failed"),
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Flat env parameter set -> typed params
// ---------------------------------------------------------------------------

fn params_from_env() -> Result<JobParams> {
    let mode = env_or("FLUX_MODE", "generate");
    match mode.as_str() {
        "generate" => Ok(JobParams::Generate(generate_from_env()?)),
        "finetune" => Ok(JobParams::Finetune(finetune_from_env()?)),
        "inference" => Ok(JobParams::Inference(inference_from_env()?)),
        other => bail!("unknown FLUX_MODE '{other}' (expected generate, finetune, or inference)"),
    }
}

fn generate_from_env() -> Result<GenerateParams> {
    let defaults = GenerateParams::default();
    Ok(GenerateParams {
        prompt: env_or("FLUX_PROMPT", ""),
        ultra: env_parse("FLUX_ULTRA", defaults.ultra)?,
        aspect_ratio: env_or("FLUX_ASPECT_RATIO", &defaults.aspect_ratio),
        safety_tolerance: env_parse("FLUX_SAFETY_TOLERANCE", defaults.safety_tolerance)?,
        output_format: parse_output_format(&env_or("FLUX_OUTPUT_FORMAT", "png"))?,
        raw: env_parse("FLUX_RAW", defaults.raw)?,
        seed: env_parse("FLUX_SEED", defaults.seed)?,
    })
}

fn finetune_from_env() -> Result<FinetuneParams> {
    let defaults = FinetuneParams::default();
    Ok(FinetuneParams {
        archive_path: env_or("FLUX_FINETUNE_ZIP", "").into(),
        comment: env_or("FLUX_FINETUNE_COMMENT", ""),
        trigger_word: env_or("FLUX_TRIGGER_WORD", &defaults.trigger_word),
        mode: parse_finetune_mode(&env_or("FLUX_FINETUNE_MODE", "general"))?,
        iterations: env_parse("FLUX_ITERATIONS", defaults.iterations)?,
        learning_rate: env_parse("FLUX_LEARNING_RATE", defaults.learning_rate)?,
        captioning: env_parse("FLUX_CAPTIONING", defaults.captioning)?,
        priority: parse_priority(&env_or("FLUX_PRIORITY", "quality"))?,
        finetune_type: parse_finetune_type(&env_or("FLUX_FINETUNE_TYPE", "full"))?,
        lora_rank: Some(env_parse("FLUX_LORA_RANK", 32)?),
    })
}

fn inference_from_env() -> Result<InferenceParams> {
    let defaults = InferenceParams::default();
    Ok(InferenceParams {
        finetune_id: env_or("FLUX_FINETUNE_ID", ""),
        finetune_strength: env_parse("FLUX_FINETUNE_STRENGTH", defaults.finetune_strength)?,
        generate: generate_from_env()?,
    })
}

fn parse_output_format(value: &str) -> Result<OutputFormat> {
    match value {
        "jpeg" => Ok(OutputFormat::Jpeg),
        "png" => Ok(OutputFormat::Png),
        other => bail!("unknown FLUX_OUTPUT_FORMAT '{other}' (expected jpeg or png)"),
    }
}

fn parse_finetune_mode(value: &str) -> Result<FinetuneMode> {
    match value {
        "character" => Ok(FinetuneMode::Character),
        "product" => Ok(FinetuneMode::Product),
        "style" => Ok(FinetuneMode::Style),
        "general" => Ok(FinetuneMode::General),
        other => bail!(
            "unknown FLUX_FINETUNE_MODE '{other}' (expected character, product, style, or general)"
        ),
    }
}

fn parse_finetune_type(value: &str) -> Result<FinetuneType> {
    match value {
        "full" => Ok(FinetuneType::Full),
        "lora" => Ok(FinetuneType::Lora),
        other => bail!("unknown FLUX_FINETUNE_TYPE '{other}' (expected full or lora)"),
    }
}

fn parse_priority(value: &str) -> Result<Priority> {
    match value {
        "speed" => Ok(Priority::Speed),
        "quality" => Ok(Priority::Quality),
        other => bail!("unknown FLUX_PRIORITY '{other}' (expected speed or quality)"),
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} has invalid value '{raw}': {e}")),
        Err(_) => Ok(default),
    }
}
