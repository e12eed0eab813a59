use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StructuringError;

/// One medicine read from the prescription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medicine {
    pub name: String,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    pub confidence: f32,
}

/// Structured view of a prescription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPrescription {
    /// Empty, never null, when nothing was found.
    #[serde(default)]
    pub medicines: Vec<Medicine>,
    pub generated_at: DateTime<Utc>,
}

impl ParsedPrescription {
    pub fn new(medicines: Vec<Medicine>) -> Self {
        Self {
            medicines,
            generated_at: Utc::now(),
        }
    }
}

/// Which strategy produced the medicines in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredBy {
    Llm,
    Heuristic,
    None,
}

/// Text-generation LLM abstraction (allows mocking).
///
/// Implementations block; call them from the blocking pool only.
pub trait LlmClient: Send + Sync {
    /// Provider label for logs and the health endpoint.
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    fn generate(&self, prompt: &str, system: &str) -> Result<String, StructuringError>;
}

/// Vision-capable chat endpoint used for image transcription.
pub trait VisionClient: Send + Sync {
    /// `images` are base64-encoded.
    fn chat_with_images(
        &self,
        model: &str,
        prompt: &str,
        images: &[String],
        system: Option<&str>,
    ) -> Result<String, StructuringError>;

    fn is_model_available(&self, model: &str) -> Result<bool, StructuringError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_medicines_deserialize_as_empty() {
        let parsed: ParsedPrescription =
            serde_json::from_str(r#"{"generated_at": "2026-01-01T00:00:00Z"}"#).unwrap();
        assert!(parsed.medicines.is_empty());
    }

    #[test]
    fn empty_medicines_serialize_as_array() {
        let json = serde_json::to_value(ParsedPrescription::new(vec![])).unwrap();
        assert_eq!(json["medicines"], serde_json::json!([]));
    }

    #[test]
    fn structured_by_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&StructuredBy::Heuristic).unwrap(), "\"heuristic\"");
        assert_eq!(serde_json::to_string(&StructuredBy::None).unwrap(), "\"none\"");
    }
}
