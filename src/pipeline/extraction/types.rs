use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::preprocess::PreparedImage;
use super::sanitize::sanitize_ocr_text;
use super::ExtractionError;

/// Text produced by one engine for one image.
///
/// Immutable once built: confidence is clamped into `[0, 1]` at construction
/// so every consumer can rely on the range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ExtractionResultRecord")]
pub struct ExtractionResult {
    engine_name: String,
    raw_text: String,
    confidence: f32,
    regions: Option<Vec<RegionConfidence>>,
}

impl ExtractionResult {
    pub fn new(
        engine_name: &str,
        raw_text: impl Into<String>,
        confidence: f32,
        regions: Option<Vec<RegionConfidence>>,
    ) -> Self {
        Self {
            engine_name: engine_name.to_string(),
            raw_text: raw_text.into(),
            confidence: normalize_confidence(confidence),
            regions,
        }
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn regions(&self) -> Option<&[RegionConfidence]> {
        self.regions.as_deref()
    }

    /// Non-empty, trimmed lines of the raw text.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.raw_text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }

    pub fn is_blank(&self) -> bool {
        self.raw_text.trim().is_empty()
    }
}

/// Wire form of `ExtractionResult`; deserialized values go through `new`.
#[derive(Deserialize)]
struct ExtractionResultRecord {
    engine_name: String,
    raw_text: String,
    confidence: f32,
    #[serde(default)]
    regions: Option<Vec<RegionConfidence>>,
}

impl From<ExtractionResultRecord> for ExtractionResult {
    fn from(record: ExtractionResultRecord) -> Self {
        Self::new(&record.engine_name, record.raw_text, record.confidence, record.regions)
    }
}

/// Clamp an engine-reported confidence into `[0, 1]`. NaN counts as zero.
pub fn normalize_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Confidence for a specific region of the image (word or line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfidence {
    pub text: String,
    pub confidence: f32,
    pub bounding_box: Option<BoundingBox>,
}

/// Bounding box for a text region, in pixels of the prepared image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// What an adapter hands back before normalization.
#[derive(Debug, Default)]
pub struct RawRecognition {
    pub text: String,
    pub confidence: f32,
    pub regions: Vec<RegionConfidence>,
}

/// Warnings about extraction quality, surfaced to the caller for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionWarning {
    LowConfidence { engine: String, confidence: f32 },
    BlurryImage,
    SkewedDocument { angle_degrees: f32 },
    PoorContrast,
    BlankPage,
    HandwritingDetected { engine: String },
    PreprocessingStepSkipped { step: String, reason: String },
    EngineTimedOut { engine: String },
    PartialExtraction { reason: String },
}

impl ExtractionWarning {
    /// Human-readable sentence for the report's `warnings` list.
    pub fn message(&self) -> String {
        match self {
            ExtractionWarning::LowConfidence { engine, confidence } => format!(
                "{engine} read the prescription with low confidence ({:.0}%)",
                confidence * 100.0
            ),
            ExtractionWarning::BlurryImage => {
                "The image looks blurry; text may be misread".to_string()
            }
            ExtractionWarning::SkewedDocument { angle_degrees } => {
                format!("The prescription is tilted by about {angle_degrees:.1} degrees")
            }
            ExtractionWarning::PoorContrast => {
                "The image has poor contrast; try better lighting".to_string()
            }
            ExtractionWarning::BlankPage => "The image appears mostly blank".to_string(),
            ExtractionWarning::HandwritingDetected { engine } => {
                format!("{engine} detected handwriting; please verify the medicines")
            }
            ExtractionWarning::PreprocessingStepSkipped { step, reason } => {
                format!("Preprocessing step '{step}' was skipped: {reason}")
            }
            ExtractionWarning::EngineTimedOut { engine } => {
                format!("{engine} did not finish in time and was skipped")
            }
            ExtractionWarning::PartialExtraction { reason } => reason.clone(),
        }
    }
}

/// Capability interface every OCR backend implements.
///
/// Implementors report failures through `recognize`; callers go through
/// `extract`, which absorbs the failure and yields `None` so a broken engine
/// simply contributes nothing.
pub trait OcrEngine: Send + Sync {
    /// Stable engine name, used for priority ordering and origin tags.
    fn name(&self) -> &str;

    /// Cheap probe run once during registry initialization.
    fn is_available(&self) -> bool {
        true
    }

    fn recognize(&self, image: &PreparedImage) -> Result<RawRecognition, ExtractionError>;

    fn extract(&self, image: &PreparedImage) -> Option<ExtractionResult> {
        let start = Instant::now();
        match self.recognize(image) {
            Ok(raw) => {
                let regions = if raw.regions.is_empty() {
                    None
                } else {
                    Some(raw.regions)
                };
                let text = sanitize_ocr_text(&raw.text);
                let result = ExtractionResult::new(self.name(), text, raw.confidence, regions);
                tracing::info!(
                    engine = %self.name(),
                    elapsed_ms = %start.elapsed().as_millis(),
                    text_len = result.raw_text().len(),
                    confidence = result.confidence(),
                    "OCR engine finished"
                );
                Some(result)
            }
            Err(e) => {
                tracing::warn!(
                    engine = %self.name(),
                    elapsed_ms = %start.elapsed().as_millis(),
                    error = %e,
                    "OCR engine contributed nothing"
                );
                None
            }
        }
    }
}
