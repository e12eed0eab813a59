pub mod types;
pub mod prompt;
pub mod parser;
pub mod ollama;
pub mod azure;
pub mod fallback;
pub mod orchestrator;

pub use types::*;
pub use prompt::*;
pub use parser::*;
pub use ollama::*;
pub use azure::*;
pub use fallback::*;
pub use orchestrator::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StructuringError {
    #[error("LLM service is not reachable at {0}")]
    Connection(String),

    #[error("LLM service returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed LLM response: {0}")]
    MalformedResponse(String),

    #[error("JSON parsing error: {0}")]
    JsonParsing(String),

    #[error("Input text too short for structuring (< 10 characters)")]
    InputTooShort,

    #[error("LLM provider not configured: {0}")]
    NotConfigured(String),
}

impl StructuringError {
    /// Classify a transport error from `reqwest`.
    pub fn from_send(e: reqwest::Error, target: &str, timeout_secs: u64) -> Self {
        if e.is_timeout() {
            StructuringError::Timeout(timeout_secs)
        } else if e.is_connect() {
            StructuringError::Connection(target.to_string())
        } else {
            StructuringError::HttpClient(e.to_string())
        }
    }

    /// Transient failures worth another LLM call.
    pub fn is_retryable(&self) -> bool {
        match self {
            StructuringError::Connection(_)
            | StructuringError::Timeout(_)
            | StructuringError::HttpClient(_) => true,
            StructuringError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The LLM answered but the answer could not be used.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            StructuringError::MalformedResponse(_) | StructuringError::JsonParsing(_)
        )
    }
}
