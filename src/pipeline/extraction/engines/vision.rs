//! Vision-model OCR: asks an Ollama vision model to transcribe the prescription.
//!
//! Vision models report no confidence of their own, so the engine reports a
//! configured constant.

use std::sync::Arc;

use base64::Engine as _;

use crate::pipeline::extraction::preprocess::{ImageVariant, PreparedImage};
use crate::pipeline::extraction::types::{OcrEngine, RawRecognition};
use crate::pipeline::extraction::ExtractionError;
use crate::pipeline::structuring::types::VisionClient;
use crate::pipeline_config::VisionEngineConfig;

const SYSTEM_PROMPT: &str = "\
You transcribe handwritten medical prescriptions. Copy the text exactly as written, \
one line of the prescription per output line. Do not explain, translate or add anything.";

const USER_PROMPT: &str = "\
Transcribe every line of this prescription, including medicine names, strengths, \
dosage instructions and durations. If there is no readable text, reply with NO_TEXT.";

const NO_TEXT_MARKER: &str = "NO_TEXT";

pub struct VisionLlmEngine {
    name: String,
    client: Arc<dyn VisionClient>,
    model: String,
    fixed_confidence: f32,
}

impl VisionLlmEngine {
    pub fn new(client: Arc<dyn VisionClient>, config: &VisionEngineConfig) -> Self {
        Self {
            name: config.name.clone(),
            client,
            model: config.model.clone(),
            fixed_confidence: config.fixed_confidence,
        }
    }
}

impl OcrEngine for VisionLlmEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        match self.client.is_model_available(&self.model) {
            Ok(available) => available,
            Err(e) => {
                tracing::debug!(engine = %self.name, error = %e, "Vision model probe failed");
                false
            }
        }
    }

    fn recognize(&self, image: &PreparedImage) -> Result<RawRecognition, ExtractionError> {
        let bytes = image.png_bytes(ImageVariant::Original);
        let _span = tracing::info_span!(
            "vision_ocr",
            model = %self.model,
            image_size = bytes.len(),
        )
        .entered();

        let images = vec![base64::engine::general_purpose::STANDARD.encode(bytes)];
        let response = self
            .client
            .chat_with_images(&self.model, USER_PROMPT, &images, Some(SYSTEM_PROMPT))
            .map_err(|e| ExtractionError::failed(&self.name, e.to_string()))?;

        Ok(RawRecognition {
            text: clean_transcription(&response),
            confidence: self.fixed_confidence,
            regions: vec![],
        })
    }
}

/// Strip code fences and the no-text marker the model may wrap around its answer.
fn clean_transcription(response: &str) -> String {
    let trimmed = response.trim();
    if trimmed.eq_ignore_ascii_case(NO_TEXT_MARKER) {
        return String::new();
    }
    trimmed
        .lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::structuring::ollama::MockVisionClient;

    fn prepared() -> PreparedImage {
        PreparedImage::from_gray(image::GrayImage::new(8, 8)).unwrap()
    }

    fn engine(client: MockVisionClient) -> VisionLlmEngine {
        VisionLlmEngine::new(Arc::new(client), &VisionEngineConfig::default())
    }

    #[test]
    fn reports_fixed_confidence() {
        let engine = engine(MockVisionClient::new("Tab Paracetamol 650mg\n1-0-1 x 3 days"));
        let result = engine.extract(&prepared()).unwrap();
        assert_eq!(result.engine_name(), "vision");
        assert_eq!(result.raw_text(), "Tab Paracetamol 650mg\n1-0-1 x 3 days");
        assert!((result.confidence() - 0.70).abs() < f32::EPSILON);
    }

    #[test]
    fn strips_code_fences() {
        assert_eq!(clean_transcription("```\nRx\nTab Zinc\n```"), "Rx\nTab Zinc");
    }

    #[test]
    fn no_text_marker_means_empty() {
        assert_eq!(clean_transcription("  no_text \n"), "");
    }

    #[test]
    fn client_error_contributes_nothing() {
        let engine = engine(MockVisionClient::failing());
        assert!(matches!(
            engine.recognize(&prepared()),
            Err(ExtractionError::EngineFailed { .. })
        ));
        assert!(engine.extract(&prepared()).is_none());
    }

    #[test]
    fn availability_follows_model_list() {
        let client = MockVisionClient::new("").with_models(vec!["llava:7b".into()]);
        assert!(engine(client).is_available());
        let client = MockVisionClient::new("").with_models(vec!["llama3.1:8b".into()]);
        assert!(!engine(client).is_available());
    }
}
