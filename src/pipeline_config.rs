//! Pipeline configuration.
//!
//! Every tunable the analysis pipeline reads lives here: scoring weights,
//! merge threshold and engine priority, preprocessing switches, engine
//! endpoints, LLM provider and server limits. All sections default sensibly so
//! an empty JSON object is a valid config file.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::pipeline::extraction::ImageVariant;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Engines still running after this long are abandoned.
    pub ocr_deadline_ms: u64,
    pub scoring: ScoringConfig,
    pub merge: MergeConfig,
    pub preprocess: PreprocessConfig,
    pub engines: EnginesConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ocr_deadline_ms: 30_000,
            scoring: ScoringConfig::default(),
            merge: MergeConfig::default(),
            preprocess: PreprocessConfig::default(),
            engines: EnginesConfig::default(),
            llm: LlmConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Weights of the quality score. They need not sum to 1; the score is clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub confidence_weight: f32,
    pub length_weight: f32,
    pub keyword_weight: f32,
    pub lines_weight: f32,
    /// Character count at which the length component saturates.
    pub reference_length: usize,
    /// Line count at which the line component saturates.
    pub reference_lines: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            confidence_weight: 0.4,
            length_weight: 0.2,
            keyword_weight: 0.3,
            lines_weight: 0.1,
            reference_length: 200,
            reference_lines: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Secondary results scoring below this contribute no lines.
    pub inclusion_threshold: f32,
    /// Engine names, most trusted first. Unlisted engines rank last.
    pub engine_priority: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            inclusion_threshold: 0.4,
            engine_priority: ["tesseract", "trocr", "easyocr", "paddleocr", "vision"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl MergeConfig {
    /// Position of `engine` in the priority list; unlisted engines share the last rank.
    pub fn priority_rank(&self, engine: &str) -> usize {
        self.engine_priority
            .iter()
            .position(|name| name == engine)
            .unwrap_or(self.engine_priority.len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub correct_orientation: bool,
    /// Longest edge after the initial downscale.
    pub max_input_dimension: u32,
    pub max_image_bytes: usize,
    /// Skew at or above this many degrees is reported as a warning.
    pub skew_warning_deg: f32,

    pub denoise: bool,
    /// Noise level under which denoising is a no-op.
    pub noise_threshold: f32,
    pub bilateral_radius: u32,
    pub bilateral_range_sigma: f32,

    pub deskew: bool,
    pub deskew_min_angle_deg: f32,

    pub enhance_contrast: bool,
    pub contrast_grid: u32,
    pub contrast_clip_limit: f32,

    pub binarize: bool,
    pub binarize_window: u32,
    pub binarize_offset: f32,

    pub despeckle: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            correct_orientation: true,
            max_input_dimension: 2400,
            max_image_bytes: 20 * 1024 * 1024,
            skew_warning_deg: 1.5,
            denoise: true,
            noise_threshold: 12.0,
            bilateral_radius: 2,
            bilateral_range_sigma: 25.0,
            deskew: true,
            deskew_min_angle_deg: 0.5,
            enhance_contrast: true,
            contrast_grid: 8,
            contrast_clip_limit: 2.0,
            binarize: true,
            binarize_window: 31,
            binarize_offset: 10.0,
            despeckle: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EnginesConfig {
    pub tesseract: TesseractConfig,
    pub vision: VisionEngineConfig,
    /// HTTP OCR sidecars (EasyOCR, PaddleOCR, TrOCR servers).
    pub remote: Vec<RemoteEngineConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    pub enabled: bool,
    pub binary: String,
    pub language: String,
    /// Page segmentation mode. 6 = single uniform block of text.
    pub psm: u8,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: "tesseract".into(),
            language: "eng".into(),
            psm: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionEngineConfig {
    pub enabled: bool,
    pub name: String,
    pub base_url: String,
    pub model: String,
    /// Reported confidence; vision models give none of their own.
    pub fixed_confidence: f32,
    pub timeout_secs: u64,
}

impl Default for VisionEngineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: "vision".into(),
            base_url: "http://localhost:11434".into(),
            model: "llava:7b".into(),
            fixed_confidence: 0.70,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteEngineConfig {
    pub name: String,
    pub enabled: bool,
    /// Full URL of the recognition endpoint.
    pub url: String,
    /// Optional liveness URL probed once at startup.
    pub health_url: Option<String>,
    /// Which rendition of the image to send.
    pub image: ImageVariant,
    pub timeout_secs: u64,
}

impl Default for RemoteEngineConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            url: String::new(),
            health_url: None,
            image: ImageVariant::Original,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Ollama,
    AzureOpenai,
    /// No LLM: medicines come from the heuristic only.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub ollama_url: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Extra attempts after the first call fails with a retryable or parse error.
    pub max_retries: u32,
    /// Backoff before retry n is `retry_base_delay_ms * 2^(n-1)`.
    pub retry_base_delay_ms: u64,
    pub azure: AzureConfig,
    /// Run drug name correction on merged text before parsing.
    pub correct_terms: bool,
    /// Extract medicine candidates with regexes when the LLM fails.
    pub heuristic_fallback: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            ollama_url: "http://localhost:11434".into(),
            model: "llama3.1:8b".into(),
            timeout_secs: 60,
            max_retries: 2,
            retry_base_delay_ms: 500,
            azure: AzureConfig::default(),
            correct_terms: true,
            heuristic_fallback: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    /// e.g. `https://my-resource.openai.azure.com`
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            deployment: "gpt-4o-mini".into(),
            api_version: "2024-06-01".into(),
            api_key_env: "AZURE_OPENAI_API_KEY".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_upload_bytes: usize,
    /// Origins allowed by CORS. Empty = same-origin only, `["*"]` = any.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            max_upload_bytes: 10 * 1024 * 1024,
            allowed_origins: vec![],
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════

const MAX_LLM_RETRIES: u32 = 10;
const MAX_LLM_RETRY_BASE_DELAY_MS: u64 = 60_000;
const MAX_LLM_TIMEOUT_SECS: u64 = 600;

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scoring;
        let weights = [
            ("confidence_weight", s.confidence_weight),
            ("length_weight", s.length_weight),
            ("keyword_weight", s.keyword_weight),
            ("lines_weight", s.lines_weight),
        ];
        for (name, w) in weights {
            if !w.is_finite() || w < 0.0 {
                return Err(invalid(format!("scoring.{name} must be a finite, non-negative number")));
            }
        }
        if weights.iter().all(|(_, w)| *w == 0.0) {
            return Err(invalid("scoring weights cannot all be zero"));
        }
        if s.reference_length == 0 || s.reference_lines == 0 {
            return Err(invalid("scoring reference length and lines must be positive"));
        }

        unit_interval("merge.inclusion_threshold", self.merge.inclusion_threshold)?;
        if self.merge.engine_priority.is_empty() {
            return Err(invalid("merge.engine_priority cannot be empty"));
        }

        if self.ocr_deadline_ms == 0 {
            return Err(invalid("ocr_deadline_ms must be positive"));
        }

        let p = &self.preprocess;
        if p.max_input_dimension < 16 {
            return Err(invalid("preprocess.max_input_dimension must be at least 16"));
        }
        if p.contrast_grid == 0 {
            return Err(invalid("preprocess.contrast_grid must be at least 1"));
        }
        if p.binarize_window < 3 {
            return Err(invalid("preprocess.binarize_window must be at least 3"));
        }

        unit_interval("engines.vision.fixed_confidence", self.engines.vision.fixed_confidence)?;
        let mut names: Vec<&str> = self.engines.remote.iter().map(|r| r.name.as_str()).collect();
        if names.iter().any(|n| n.trim().is_empty()) {
            return Err(invalid("every remote engine needs a name"));
        }
        if self.engines.remote.iter().any(|r| r.enabled && r.url.trim().is_empty()) {
            return Err(invalid("enabled remote engines need a url"));
        }
        names.push("tesseract");
        names.push(&self.engines.vision.name);
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        if names.len() != total {
            return Err(invalid("engine names must be unique"));
        }

        if self.server.max_upload_bytes == 0 {
            return Err(invalid("server.max_upload_bytes must be positive"));
        }
        let l = &self.llm;
        if l.max_retries > MAX_LLM_RETRIES {
            return Err(invalid(format!("llm.max_retries must be at most {MAX_LLM_RETRIES}")));
        }
        if l.retry_base_delay_ms > MAX_LLM_RETRY_BASE_DELAY_MS {
            return Err(invalid(format!(
                "llm.retry_base_delay_ms must be at most {MAX_LLM_RETRY_BASE_DELAY_MS}"
            )));
        }
        if l.timeout_secs > MAX_LLM_TIMEOUT_SECS {
            return Err(invalid(format!("llm.timeout_secs must be at most {MAX_LLM_TIMEOUT_SECS}")));
        }
        if self.llm.provider == LlmProvider::AzureOpenai && self.llm.azure.endpoint.trim().is_empty() {
            return Err(invalid("llm.azure.endpoint is required for the azure_openai provider"));
        }

        Ok(())
    }
}

fn unit_interval(name: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be within [0, 1]")))
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
