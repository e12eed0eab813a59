pub mod types;
pub mod sanitize;
pub mod lexicon;
pub mod preprocess;
pub mod confidence;
pub mod engines;
pub mod scoring;
pub mod merge;
pub mod medical_correction;

pub use types::*;
pub use confidence::*;
pub use sanitize::*;
pub use preprocess::*;
pub use engines::*;
pub use scoring::*;
pub use merge::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image preprocessing failed: {0}")]
    Preprocessing(String),

    #[error("OCR engine '{engine}' is unavailable: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    #[error("OCR engine '{engine}' failed: {reason}")]
    EngineFailed { engine: String, reason: String },

    #[error("No OCR engine produced any text")]
    NoResults,

    #[error("Image encoding error: {0}")]
    Image(String),
}

impl ExtractionError {
    pub fn unavailable(engine: &str, reason: impl Into<String>) -> Self {
        ExtractionError::EngineUnavailable {
            engine: engine.to_string(),
            reason: reason.into(),
        }
    }

    pub fn failed(engine: &str, reason: impl Into<String>) -> Self {
        ExtractionError::EngineFailed {
            engine: engine.to_string(),
            reason: reason.into(),
        }
    }
}
