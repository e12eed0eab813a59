//! OCR sidecars reached over HTTP (EasyOCR, PaddleOCR or TrOCR servers).
//!
//! Request: `POST <url>` with `{"image": "<base64 png>", "format": "png"}`.
//! Response: `{"lines": [{"text": "...", "confidence": 0.91, "bbox": [x, y, w, h]}]}`.
//! `confidence` and `bbox` are optional per line; a missing confidence counts as 0.

use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::pipeline::extraction::preprocess::{ImageVariant, PreparedImage};
use crate::pipeline::extraction::types::{BoundingBox, OcrEngine, RawRecognition, RegionConfidence};
use crate::pipeline::extraction::ExtractionError;
use crate::pipeline_config::RemoteEngineConfig;

pub struct RemoteOcrEngine {
    name: String,
    url: String,
    health_url: Option<String>,
    variant: ImageVariant,
    timeout_secs: u64,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct RemoteOcrRequest<'a> {
    image: &'a str,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct RemoteOcrResponse {
    #[serde(default)]
    pub lines: Vec<RemoteLine>,
}

#[derive(Debug, Deserialize)]
pub struct RemoteLine {
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub bbox: Option<[f32; 4]>,
}

impl RemoteOcrEngine {
    pub fn new(config: &RemoteEngineConfig) -> Result<Self, ExtractionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExtractionError::unavailable(&config.name, e.to_string()))?;

        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            health_url: config.health_url.clone(),
            variant: config.image,
            timeout_secs: config.timeout_secs,
            client,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ExtractionError {
        if e.is_connect() {
            ExtractionError::unavailable(&self.name, format!("cannot connect to {}", self.url))
        } else if e.is_timeout() {
            ExtractionError::failed(
                &self.name,
                format!("request timed out after {}s", self.timeout_secs),
            )
        } else {
            ExtractionError::failed(&self.name, e.to_string())
        }
    }
}

impl OcrEngine for RemoteOcrEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        let Some(health_url) = &self.health_url else {
            return true;
        };
        match self.client.get(health_url).send() {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(engine = %self.name, error = %e, "Health probe failed");
                false
            }
        }
    }

    fn recognize(&self, image: &PreparedImage) -> Result<RawRecognition, ExtractionError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image.png_bytes(self.variant));
        let body = RemoteOcrRequest {
            image: &encoded,
            format: "png",
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExtractionError::failed(
                &self.name,
                format!("HTTP {}: {}", status.as_u16(), body.trim()),
            ));
        }

        let parsed: RemoteOcrResponse = response
            .json()
            .map_err(|e| ExtractionError::failed(&self.name, format!("invalid response: {e}")))?;

        Ok(recognition_from_lines(parsed.lines))
    }
}

/// Join non-empty lines; confidence is the mean over those lines.
pub fn recognition_from_lines(lines: Vec<RemoteLine>) -> RawRecognition {
    let regions: Vec<RegionConfidence> = lines
        .into_iter()
        .filter(|l| !l.text.trim().is_empty())
        .map(|l| RegionConfidence {
            text: l.text.trim().to_string(),
            confidence: l.confidence,
            bounding_box: l.bbox.and_then(to_bounding_box),
        })
        .collect();

    let confidence = if regions.is_empty() {
        0.0
    } else {
        regions.iter().map(|r| r.confidence).sum::<f32>() / regions.len() as f32
    };

    RawRecognition {
        text: regions
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        confidence,
        regions,
    }
}

fn to_bounding_box([x, y, w, h]: [f32; 4]) -> Option<BoundingBox> {
    if [x, y, w, h].iter().any(|v| !v.is_finite() || *v < 0.0) {
        return None;
    }
    Some(BoundingBox {
        x: x.round() as u32,
        y: y.round() as u32,
        width: w.round() as u32,
        height: h.round() as u32,
    })
}
