//! Anthropic Messages API backend.

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

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: usize = 1500;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    system: &'static str,
    messages: Vec<UserMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Analysis capability backed by the Anthropic Messages API.
pub struct AnthropicCapability {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model_name: String,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

impl AnthropicCapability {
    /// Reads the API key from the environment variable named in the config.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ModelConfig, api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("Anthropic API key is empty");
        }

        let timeout = Duration::from_secs(config.timeout_seconds);
        let endpoint = config.endpoint();

        info!("Using Anthropic model {} at {}", config.name, endpoint);

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            model_name: config.name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            timeout,
        })
    }
}

fn first_text_block(response: MessagesResponse) -> Option<String> {
    response
        .content
        .into_iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text)
}

#[async_trait]
impl AnalysisCapability for AnthropicCapability {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn invoke(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, CapabilityError> {
        let url = format!("{}/v1/messages", self.endpoint);
        let prompt = request.prompt();
        let body = MessagesRequest {
            model: &self.model_name,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: SYSTEM_PROMPT,
            messages: vec![UserMessage {
                role: "user",
                content: &prompt,
            }],
        };

        debug!("Sending {:?} request ({} chars)", request.task, prompt.len());

        let response = self
            .http_client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, &self.endpoint, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }

        let decoded: MessagesResponse = response
            .json()
            .await
            .map_err(|e| {
                CapabilityError::Malformed(format!("failed to decode Anthropic response: {}", e))
            })?;

        first_text_block(decoded)
            .map(AnalysisResponse::Text)
            .ok_or_else(|| {
                CapabilityError::Malformed("response contained no text block".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;

    #[test]
    fn test_first_text_block() {
        let raw = r#"{"id":"msg_1","content":[{"type":"tool_use","id":"t"},{"type":"text","text":"{\"stance\":\"HOLD\"}"}]}"#;
        let decoded: MessagesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            first_text_block(decoded).as_deref(),
            Some("{\"stance\":\"HOLD\"}")
        );

        let empty: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert_eq!(first_text_block(empty), None);
    }

    #[test]
    fn test_rejects_empty_key() {
        let config = ModelConfig {
            provider: Provider::Anthropic,
            ..ModelConfig::default()
        };
        assert!(AnthropicCapability::with_api_key(&config, "  ".to_string()).is_err());

        let capability = AnthropicCapability::with_api_key(&config, "sk-test".to_string()).unwrap();
        assert_eq!(capability.endpoint, "https://api.anthropic.com");
        assert_eq!(capability.max_tokens, DEFAULT_MAX_TOKENS);
    }
}
