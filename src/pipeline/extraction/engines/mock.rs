use std::time::Duration;

use crate::pipeline::extraction::preprocess::PreparedImage;
use crate::pipeline::extraction::types::{OcrEngine, RawRecognition, RegionConfidence};
use crate::pipeline::extraction::ExtractionError;

/// Mock OCR engine for tests and offline runs.
pub struct MockOcrEngine {
    name: String,
    text: String,
    confidence: f32,
    failure: Option<String>,
    delay: Option<Duration>,
    available: bool,
}

impl MockOcrEngine {
    pub fn new(name: &str, text: &str, confidence: f32) -> Self {
        Self {
            name: name.to_string(),
            text: text.to_string(),
            confidence,
            failure: None,
            delay: None,
            available: true,
        }
    }

    /// Every `recognize` call fails with this reason.
    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    /// Block for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

impl OcrEngine for MockOcrEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn recognize(&self, _image: &PreparedImage) -> Result<RawRecognition, ExtractionError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(reason) = &self.failure {
            return Err(ExtractionError::failed(&self.name, reason.clone()));
        }

        let regions = self
            .text
            .split_whitespace()
            .map(|w| RegionConfidence {
                text: w.to_string(),
                confidence: self.confidence,
                bounding_box: None,
            })
            .collect();

        Ok(RawRecognition {
            text: self.text.clone(),
            confidence: self.confidence,
            regions,
        })
    }
}
