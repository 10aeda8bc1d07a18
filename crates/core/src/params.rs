//! Job kinds, parameter sets, and validation.
//!
//! Each job kind has its own typed parameter struct with a `validate`
//! method. Validation runs before any network call; every violation
//! names the offending field so the host can surface it directly.

use std::path::PathBuf;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Value domains
// ---------------------------------------------------------------------------

/// Aspect ratios accepted by the generation endpoints.
pub const ASPECT_RATIOS: &[&str] = &["21:9", "16:9", "4:3", "1:1", "3:4", "9:16", "9:21"];

/// Upper bound (inclusive) for the moderation tolerance knob.
pub const SAFETY_TOLERANCE_MAX: u8 = 6;

/// Minimum training iterations the finetune endpoint accepts.
pub const MIN_FINETUNE_ITERATIONS: u32 = 100;

/// Valid LoRA ranks for `finetune_type = lora`.
pub const LORA_RANKS: &[u32] = &[16, 32];

/// Bounds on the number of training images in a finetune archive.
pub const MIN_TRAINING_IMAGES: usize = 5;
/// See [`MIN_TRAINING_IMAGES`].
pub const MAX_TRAINING_IMAGES: usize = 20;

/// Allowed finetune strength range for inference with a finetuned model.
pub const MAX_FINETUNE_STRENGTH: f64 = 2.0;

/// Map an aspect ratio to the explicit dimensions the non-ultra
/// endpoint expects. Unknown ratios fall back to 16:9 dimensions, but
/// validation rejects them before this is ever reached.
pub fn dimensions_for_ratio(ratio: &str) -> (u32, u32) {
    match ratio {
        "1:1" => (1024, 1024),
        "4:3" => (1408, 1024),
        "3:4" => (1024, 1408),
        "16:9" => (1408, 800),
        "9:16" => (800, 1408),
        "21:9" => (1408, 608),
        "9:21" => (608, 1408),
        _ => (1408, 800),
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The three job kinds the orchestration engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Text-to-image generation.
    Generate,
    /// Train a finetuned model from an image archive.
    Finetune,
    /// Text-to-image generation using a previously finetuned model.
    Inference,
}

/// Image encoding requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
}

/// What the finetune is meant to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinetuneMode {
    Character,
    Product,
    Style,
    General,
}

/// Full-model finetune or a LoRA adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinetuneType {
    Full,
    Lora,
}

/// Queue priority for a finetune job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Speed,
    Quality,
}

// ---------------------------------------------------------------------------
// Validation error
// ---------------------------------------------------------------------------

/// A parameter failed validation. Always names the offending field.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// The parameter that failed.
    pub field: &'static str,
    /// Human-readable cause.
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Generate
// ---------------------------------------------------------------------------

/// Parameters for a text-to-image generation job.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub prompt: String,
    /// Use the ultra endpoint (aspect-ratio based) rather than the
    /// regular endpoint (explicit width/height).
    pub ultra: bool,
    pub aspect_ratio: String,
    /// Moderation tolerance, 0 (strict) to 6 (permissive).
    pub safety_tolerance: u8,
    pub output_format: OutputFormat,
    /// Raw mode produces less-processed output. Only meaningful on the
    /// ultra endpoint; ignored otherwise.
    pub raw: bool,
    /// Generation seed; -1 lets the service pick one.
    pub seed: i64,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            ultra: true,
            aspect_ratio: "16:9".to_string(),
            safety_tolerance: 6,
            output_format: OutputFormat::Png,
            raw: false,
            seed: -1,
        }
    }
}

impl GenerateParams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::new("prompt", "prompt must not be empty"));
        }
        if !ASPECT_RATIOS.contains(&self.aspect_ratio.as_str()) {
            return Err(ValidationError::new(
                "aspect_ratio",
                format!(
                    "'{}' is not one of: {}",
                    self.aspect_ratio,
                    ASPECT_RATIOS.join(", ")
                ),
            ));
        }
        if self.safety_tolerance > SAFETY_TOLERANCE_MAX {
            return Err(ValidationError::new(
                "safety_tolerance",
                format!(
                    "{} is out of range 0..={SAFETY_TOLERANCE_MAX}",
                    self.safety_tolerance
                ),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Finetune
// ---------------------------------------------------------------------------

/// Parameters for a model finetuning job.
///
/// `archive_path` must point to a readable ZIP of 5-20 training images;
/// the archive itself is inspected at request-build time, which is the
/// builder's I/O boundary rather than a pure validation step.
#[derive(Debug, Clone)]
pub struct FinetuneParams {
    pub archive_path: PathBuf,
    /// Label attached to the finetune so it can be told apart later.
    pub comment: String,
    /// Token callers embed in prompts to invoke the learned concept.
    pub trigger_word: String,
    pub mode: FinetuneMode,
    pub iterations: u32,
    pub learning_rate: f64,
    /// Let the service auto-caption the training images.
    pub captioning: bool,
    pub priority: Priority,
    pub finetune_type: FinetuneType,
    /// Required when `finetune_type` is [`FinetuneType::Lora`].
    pub lora_rank: Option<u32>,
}

impl Default for FinetuneParams {
    fn default() -> Self {
        Self {
            archive_path: PathBuf::new(),
            comment: String::new(),
            trigger_word: "TOK".to_string(),
            mode: FinetuneMode::General,
            iterations: 300,
            learning_rate: 1e-5,
            captioning: true,
            priority: Priority::Quality,
            finetune_type: FinetuneType::Full,
            lora_rank: Some(32),
        }
    }
}

impl FinetuneParams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.comment.trim().is_empty() {
            return Err(ValidationError::new(
                "finetune_comment",
                "a comment labelling the finetune is required",
            ));
        }
        if self.trigger_word.trim().is_empty() {
            return Err(ValidationError::new(
                "trigger_word",
                "trigger word must not be empty",
            ));
        }
        if self.iterations < MIN_FINETUNE_ITERATIONS {
            return Err(ValidationError::new(
                "iterations",
                format!(
                    "{} is below the minimum of {MIN_FINETUNE_ITERATIONS}",
                    self.iterations
                ),
            ));
        }
        if self.learning_rate <= 0.0 {
            return Err(ValidationError::new(
                "learning_rate",
                "learning rate must be positive",
            ));
        }
        if self.finetune_type == FinetuneType::Lora {
            match self.lora_rank {
                None => {
                    return Err(ValidationError::new(
                        "lora_rank",
                        "lora_rank is required for lora finetunes",
                    ));
                }
                Some(rank) if !LORA_RANKS.contains(&rank) => {
                    return Err(ValidationError::new(
                        "lora_rank",
                        format!("{rank} is not one of: 16, 32"),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// Parameters for generation with a previously finetuned model.
///
/// Carries the full generation parameter set. The trigger word is
/// expected to appear in the prompt for the finetune to take effect;
/// that convention is documented, not enforced.
#[derive(Debug, Clone)]
pub struct InferenceParams {
    /// Id of a completed finetune job.
    pub finetune_id: String,
    /// How strongly the finetune influences the output, 0 to 2.
    pub finetune_strength: f64,
    pub generate: GenerateParams,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            finetune_id: String::new(),
            finetune_strength: 1.2,
            generate: GenerateParams::default(),
        }
    }
}

impl InferenceParams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.finetune_id.trim().is_empty() {
            return Err(ValidationError::new(
                "finetune_id",
                "finetune id must not be empty",
            ));
        }
        if !(0.0..=MAX_FINETUNE_STRENGTH).contains(&self.finetune_strength) {
            return Err(ValidationError::new(
                "finetune_strength",
                format!(
                    "{} is out of range 0..={MAX_FINETUNE_STRENGTH}",
                    self.finetune_strength
                ),
            ));
        }
        self.generate.validate()
    }
}

// ---------------------------------------------------------------------------
// Tagged union over the three kinds
// ---------------------------------------------------------------------------

/// A job's parameter set, tagged by kind.
///
/// The request builder, poll-policy selection, and result decoder all
/// match exhaustively on this (or on [`JobKind`]) rather than branching
/// on strings.
#[derive(Debug, Clone)]
pub enum JobParams {
    Generate(GenerateParams),
    Finetune(FinetuneParams),
    Inference(InferenceParams),
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Generate(_) => JobKind::Generate,
            JobParams::Finetune(_) => JobKind::Finetune,
            JobParams::Inference(_) => JobKind::Inference,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            JobParams::Generate(p) => p.validate(),
            JobParams::Finetune(p) => p.validate(),
            JobParams::Inference(p) => p.validate(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
