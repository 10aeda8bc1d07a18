//! Submit-request construction for the three job kinds.
//!
//! Validates the parameter set, then assembles the endpoint and JSON
//! payload the service expects. Finetune requests additionally read
//! the training archive from disk here -- the builder is the explicit
//! I/O boundary so the transport layer stays pure network.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

use fluxbridge_core::params::{
    dimensions_for_ratio, FinetuneParams, FinetuneType, GenerateParams, InferenceParams, JobKind,
    JobParams, ValidationError, MAX_TRAINING_IMAGES, MIN_TRAINING_IMAGES,
};

/// Ultra generation endpoint (aspect-ratio driven).
pub const ENDPOINT_GENERATE_ULTRA: &str = "flux-pro-1.1-ultra";
/// Regular generation endpoint (explicit width/height).
pub const ENDPOINT_GENERATE: &str = "flux-pro-1.1";
/// Finetune submission endpoint.
pub const ENDPOINT_FINETUNE: &str = "finetune";
/// Ultra inference endpoint for finetuned models.
pub const ENDPOINT_INFERENCE_ULTRA: &str = "flux-pro-1.1-ultra-finetuned";
/// Regular inference endpoint for finetuned models.
pub const ENDPOINT_INFERENCE: &str = "flux-pro-finetuned";

/// File extensions counted as training images inside a finetune archive.
const TRAINING_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// A fully built submit request.
///
/// Built fresh per orchestration and never mutated after submission.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub kind: JobKind,
    /// Endpoint path appended to the API base URL.
    pub endpoint: &'static str,
    pub payload: Value,
}

/// Validate `params` and build the submit request for its kind.
///
/// This is the only place a [`ValidationError`] can arise; everything
/// downstream of a successfully built request degrades into a terminal
/// outcome instead of erroring.
pub fn build(params: &JobParams) -> Result<JobRequest, ValidationError> {
    params.validate()?;

    match params {
        JobParams::Generate(p) => Ok(build_generate(p)),
        JobParams::Inference(p) => Ok(build_inference(p)),
        JobParams::Finetune(p) => build_finetune(p),
    }
}

fn build_generate(params: &GenerateParams) -> JobRequest {
    let (endpoint, mut payload) = generation_fields(params);
    if params.seed >= 0 {
        payload["seed"] = json!(params.seed);
    }
    JobRequest {
        kind: JobKind::Generate,
        endpoint,
        payload,
    }
}

fn build_inference(params: &InferenceParams) -> JobRequest {
    let (_, mut payload) = generation_fields(&params.generate);
    if params.generate.seed >= 0 {
        payload["seed"] = json!(params.generate.seed);
    }
    payload["finetune_id"] = json!(params.finetune_id);
    payload["finetune_strength"] = json!(params.finetune_strength);

    let endpoint = if params.generate.ultra {
        ENDPOINT_INFERENCE_ULTRA
    } else {
        ENDPOINT_INFERENCE
    };
    JobRequest {
        kind: JobKind::Inference,
        endpoint,
        payload,
    }
}

/// Shared generation payload shape. The ultra endpoints take an aspect
/// ratio and a raw flag; the regular endpoints take explicit pixel
/// dimensions and ignore raw.
fn generation_fields(params: &GenerateParams) -> (&'static str, Value) {
    if params.ultra {
        (
            ENDPOINT_GENERATE_ULTRA,
            json!({
                "prompt": params.prompt,
                "aspect_ratio": params.aspect_ratio,
                "safety_tolerance": params.safety_tolerance,
                "output_format": params.output_format,
                "raw": params.raw,
            }),
        )
    } else {
        let (width, height) = dimensions_for_ratio(&params.aspect_ratio);
        (
            ENDPOINT_GENERATE,
            json!({
                "prompt": params.prompt,
                "width": width,
                "height": height,
                "safety_tolerance": params.safety_tolerance,
                "output_format": params.output_format,
            }),
        )
    }
}

fn build_finetune(params: &FinetuneParams) -> Result<JobRequest, ValidationError> {
    let archive = read_training_archive(&params.archive_path)?;

    let mut payload = json!({
        "finetune_comment": params.comment,
        "trigger_word": params.trigger_word,
        "file_data": BASE64.encode(&archive),
        "iterations": params.iterations,
        "mode": params.mode,
        "learning_rate": params.learning_rate,
        "captioning": params.captioning,
        "priority": params.priority,
        "finetune_type": params.finetune_type,
    });
    if params.finetune_type == FinetuneType::Lora {
        // Validation guarantees the rank is present for lora.
        payload["lora_rank"] = json!(params.lora_rank);
    }

    Ok(JobRequest {
        kind: JobKind::Finetune,
        endpoint: ENDPOINT_FINETUNE,
        payload,
    })
}

/// Read a finetune training archive and check its image count.
///
/// Returns the raw archive bytes for base64 embedding. The archive
/// must be a readable ZIP holding between [`MIN_TRAINING_IMAGES`] and
/// [`MAX_TRAINING_IMAGES`] images (jpg/jpeg/png/webp); macOS resource
/// entries are not counted.
fn read_training_archive(path: &Path) -> Result<Vec<u8>, ValidationError> {
    let bytes = fs::read(path).map_err(|e| {
        ValidationError::new(
            "finetune_zip",
            format!("cannot read archive at {}: {e}", path.display()),
        )
    })?;

    let archive = zip::ZipArchive::new(Cursor::new(&bytes[..])).map_err(|e| {
        ValidationError::new(
            "finetune_zip",
            format!("{} is not a valid ZIP archive: {e}", path.display()),
        )
    })?;

    let images = archive
        .file_names()
        .filter(|name| !name.starts_with("__MACOSX/"))
        .filter(|name| {
            Path::new(name)
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    TRAINING_IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
                })
        })
        .count();

    if !(MIN_TRAINING_IMAGES..=MAX_TRAINING_IMAGES).contains(&images) {
        return Err(ValidationError::new(
            "finetune_zip",
            format!(
                "archive must contain {MIN_TRAINING_IMAGES}-{MAX_TRAINING_IMAGES} training images, found {images}"
            ),
        ));
    }

    Ok(bytes)
}
