//! Ollama chat backend.

use super::{
    map_send_error, map_status, AnalysisCapability, AnalysisRequest, AnalysisResponse,
    SYSTEM_PROMPT,
};
use crate::config::ModelConfig;
use crate::error::CapabilityError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Message in the chat request.
#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    /// Constrains the model to emit JSON.
    format: &'static str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Analysis capability backed by a local or remote Ollama server.
pub struct OllamaCapability {
    http_client: reqwest::Client,
    endpoint: String,
    model_name: String,
    temperature: f32,
    max_tokens: Option<usize>,
    timeout: Duration,
}

impl OllamaCapability {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let endpoint = config.endpoint();

        info!("Using Ollama model {} at {}", config.name, endpoint);

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model_name: config.name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
        })
    }

    fn build_request<'a>(&'a self, prompt: &'a str) -> OllamaChatRequest<'a> {
        OllamaChatRequest {
            model: &self.model_name,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        }
    }
}

#[async_trait]
impl AnalysisCapability for OllamaCapability {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn invoke(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, CapabilityError> {
        let url = format!("{}/api/chat", self.endpoint);
        let prompt = request.prompt();
        let body = self.build_request(&prompt);

        debug!("Sending {:?} request ({} chars)", request.task, prompt.len());

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, &self.endpoint, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| {
                CapabilityError::Malformed(format!("failed to decode Ollama response: {}", e))
            })?;

        Ok(AnalysisResponse::Text(chat_response.message.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let config = ModelConfig {
            endpoint: Some("http://localhost:11434/".to_string()),
            max_tokens: Some(800),
            ..ModelConfig::default()
        };
        let capability = OllamaCapability::new(&config).unwrap();
        assert_eq!(capability.endpoint, "http://localhost:11434");

        let body = serde_json::to_value(capability.build_request("analyze this")).unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(body["format"], "json");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "analyze this");
        assert_eq!(body["options"]["num_predict"], 800);
    }

    #[test]
    fn test_response_decoding() {
        let raw = r#"{"model":"llama3.2","message":{"role":"assistant","content":"{\"a\":1}"},"done":true}"#;
        let decoded: OllamaChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(decoded.message.content, "{\"a\":1}");
    }
}
