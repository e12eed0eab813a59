use std::sync::Arc;
use std::time::Duration;

use super::azure::AzureOpenAiClient;
use super::ollama::OllamaClient;
use super::parser::parse_prescription_response;
use super::prompt::{build_prescription_prompt, PRESCRIPTION_SYSTEM_PROMPT};
use super::types::{LlmClient, ParsedPrescription};
use super::StructuringError;
use crate::pipeline_config::{LlmConfig, LlmProvider};

/// Minimum input length for structuring (characters).
const MIN_INPUT_LENGTH: usize = 10;

/// Build the configured LLM client. `None` when structuring is disabled.
///
/// Creates a blocking HTTP client, so call it outside the async runtime.
pub fn build_llm_client(config: &LlmConfig) -> Result<Option<Arc<dyn LlmClient>>, StructuringError> {
    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::Disabled => return Ok(None),
        LlmProvider::Ollama => Arc::new(OllamaClient::new(
            &config.ollama_url,
            &config.model,
            config.timeout_secs,
        )?),
        LlmProvider::AzureOpenai => Arc::new(AzureOpenAiClient::from_env(&config.azure, config.timeout_secs)?),
    };
    tracing::info!(provider = %client.provider(), model = %client.model(), "LLM client configured");
    Ok(Some(client))
}

/// Turns merged OCR text into a `ParsedPrescription` through an LLM.
///
/// Blocking: run it on the blocking pool. Transport errors and unusable
/// answers are retried with exponential backoff; other errors return at once.
pub struct PrescriptionParser {
    llm: Arc<dyn LlmClient>,
    max_retries: u32,
    base_delay: Duration,
    request_timeout: Duration,
}

impl PrescriptionParser {
    pub fn new(llm: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        Self {
            llm,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            request_timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn provider(&self) -> &str {
        self.llm.provider()
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    /// Upper bound on how long `parse` can take: every attempt timing out plus all backoff.
    pub fn time_budget(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let backoff = (1..attempts)
            .map(|n| self.backoff(n))
            .fold(Duration::ZERO, Duration::saturating_add);
        self.request_timeout.saturating_mul(attempts).saturating_add(backoff)
    }

    /// Delay before retry `n` (1-based).
    fn backoff(&self, n: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(n.saturating_sub(1)))
    }

    pub fn parse(&self, ocr_text: &str, ocr_confidence: f32) -> Result<ParsedPrescription, StructuringError> {
        if ocr_text.trim().chars().count() < MIN_INPUT_LENGTH {
            return Err(StructuringError::InputTooShort);
        }

        let prompt = build_prescription_prompt(ocr_text, ocr_confidence);
        let mut attempt = 0;

        loop {
            let outcome = self
                .llm
                .generate(&prompt, PRESCRIPTION_SYSTEM_PROMPT)
                .and_then(|response| parse_prescription_response(&response));

            match outcome {
                Ok(medicines) => {
                    tracing::info!(
                        provider = %self.llm.provider(),
                        attempts = attempt + 1,
                        medicines = medicines.len(),
                        "Prescription structured"
                    );
                    return Ok(ParsedPrescription::new(medicines));
                }
                Err(e) if (e.is_retryable() || e.is_parse_error()) && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        provider = %self.llm.provider(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "LLM structuring failed, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
