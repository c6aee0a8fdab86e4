//! Text generation: the [`LanguageModel`] capability and an Ollama client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LlmError;
use crate::models::LlmConfig;
use crate::utils::{RetryConfig, with_retry};

/// Generates text from a prompt.
///
/// Implementations need not be reentrant: all calls from retrieval chains
/// go through the inference scheduler one at a time.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

/// Client for an Ollama server's `POST /api/generate`.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health_check(&self) -> Result<(), LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::ServerError(format!(
                "health check failed with status: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn request(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else if e.is_connect() {
                    LlmError::ConnectionError(e.to_string())
                } else {
                    LlmError::RequestError(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::ServerError(format!("status {}: {}", status, body)));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if !body.done {
            tracing::warn!(model = %self.model, "generation response not marked done");
        }

        Ok(body.response.trim().to_string())
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        with_retry(&RetryConfig::for_generation(), || self.request(prompt))
            .await
            .into_result()
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_disables_streaming() {
        let request = GenerateRequest {
            model: "llama3.1:8b",
            prompt: "hi",
            stream: false,
            options: GenerateOptions { temperature: 0.1 },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["model"], "llama3.1:8b");
    }

    #[test]
    fn test_response_parsing() {
        let body: GenerateResponse =
            serde_json::from_str(r#"{"model":"m","response":" Paris. ","done":true}"#).unwrap();
        assert_eq!(body.response, " Paris. ");
        assert!(body.done);
    }

    #[test]
    fn test_client_uses_configured_model() {
        let client = OllamaClient::new(&LlmConfig::default()).unwrap();
        assert_eq!(client.name(), "llama3.1:8b");
        assert_eq!(client.base_url(), "http://localhost:11434");
    }
}
