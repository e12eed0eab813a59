use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::LlmClient;
use super::StructuringError;
use crate::pipeline_config::AzureConfig;

/// Azure OpenAI chat-completions client.
pub struct AzureOpenAiClient {
    url: String,
    deployment: String,
    api_key: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl AzureOpenAiClient {
    pub fn new(config: &AzureConfig, api_key: String, timeout_secs: u64) -> Result<Self, StructuringError> {
        if config.endpoint.trim().is_empty() {
            return Err(StructuringError::NotConfigured("Azure endpoint is empty".into()));
        }
        if api_key.trim().is_empty() {
            return Err(StructuringError::NotConfigured("Azure API key is empty".into()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StructuringError::HttpClient(e.to_string()))?;

        Ok(Self {
            url: completions_url(config),
            deployment: config.deployment.clone(),
            api_key,
            client,
            timeout_secs,
        })
    }

    /// Read the key from the environment variable named in config.
    pub fn from_env(config: &AzureConfig, timeout_secs: u64) -> Result<Self, StructuringError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            StructuringError::NotConfigured(format!("environment variable {} is not set", config.api_key_env))
        })?;
        Self::new(config, api_key, timeout_secs)
    }
}

fn completions_url(config: &AzureConfig) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        config.endpoint.trim_end_matches('/'),
        config.deployment,
        config.api_version
    )
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LlmClient for AzureOpenAiClient {
    fn provider(&self) -> &str {
        "azure_openai"
    }

    fn model(&self) -> &str {
        &self.deployment
    }

    fn generate(&self, prompt: &str, system: &str) -> Result<String, StructuringError> {
        let body = ChatCompletionRequest {
            messages: [
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| StructuringError::from_send(e, "Azure OpenAI", self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StructuringError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .map_err(|e| StructuringError::MalformedResponse(e.to_string()))?;
        first_choice_content(parsed)
    }
}

fn first_choice_content(response: ChatCompletionResponse) -> Result<String, StructuringError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| StructuringError::MalformedResponse("completion has no content".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AzureConfig {
        AzureConfig {
            endpoint: "https://rx.openai.azure.com/".into(),
            ..AzureConfig::default()
        }
    }

    #[test]
    fn builds_deployment_url() {
        assert_eq!(
            completions_url(&config()),
            "https://rx.openai.azure.com/openai/deployments/gpt-4o-mini/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn empty_key_rejected() {
        assert!(matches!(
            AzureOpenAiClient::new(&config(), "  ".into(), 30),
            Err(StructuringError::NotConfigured(_))
        ));
    }

    #[test]
    fn empty_endpoint_rejected() {
        assert!(AzureOpenAiClient::new(&AzureConfig::default(), "key".into(), 30).is_err());
    }

    #[test]
    fn missing_env_var_rejected() {
        let config = AzureConfig {
            api_key_env: "RXSCAN_TEST_UNSET_AZURE_KEY_VARIABLE".into(),
            ..config()
        };
        let err = AzureOpenAiClient::from_env(&config, 30).err().unwrap();
        assert!(err.to_string().contains("RXSCAN_TEST_UNSET_AZURE_KEY_VARIABLE"));
    }

    #[test]
    fn reads_first_choice() {
        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "{\"medicines\": []}"}}]}"#,
        )
        .unwrap();
        assert_eq!(first_choice_content(response).unwrap(), r#"{"medicines": []}"#);
    }

    #[test]
    fn no_choices_is_malformed() {
        let response: ChatCompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            first_choice_content(response),
            Err(StructuringError::MalformedResponse(_))
        ));
    }

    #[test]
    fn client_reports_deployment_as_model() {
        let client = AzureOpenAiClient::new(&config(), "key".into(), 30).unwrap();
        assert_eq!(client.model(), "gpt-4o-mini");
        assert_eq!(client.provider(), "azure_openai");
    }
}
