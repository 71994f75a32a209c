//! Text-analysis capability abstraction.
//!
//! The pipeline talks to the external LLM service only through
//! [`AnalysisCapability`], so it can run against Ollama, the Anthropic
//! Messages API, or a scripted in-memory double in tests.

pub mod anthropic;
pub mod ollama;
pub mod parse;
pub mod scripted;

pub use anthropic::AnthropicCapability;
pub use ollama::OllamaCapability;
pub use scripted::ScriptedCapability;

use crate::config::{ModelConfig, Provider};
use crate::error::CapabilityError;
use crate::models::Segment;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// What a capability call is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisTask {
    /// Map stage: one segment of a larger document.
    Segment { index: usize, total: usize },
    /// Reduce stage: combine the per-segment findings.
    Synthesis { parts: usize },
}

/// A single request to the capability.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    /// Material to analyze.
    pub text: String,
    /// Instructions framing the material (scope, expected JSON schema).
    pub framing_context: String,
    pub task: AnalysisTask,
}

impl AnalysisRequest {
    pub fn for_segment(segment: &Segment<'_>, framing_context: String) -> Self {
        Self {
            text: segment.text.to_string(),
            framing_context,
            task: AnalysisTask::Segment {
                index: segment.index,
                total: segment.total_count,
            },
        }
    }

    pub fn for_synthesis(parts: usize, payload: String, framing_context: String) -> Self {
        Self {
            text: payload,
            framing_context,
            task: AnalysisTask::Synthesis { parts },
        }
    }

    /// Single user message combining framing and material.
    pub fn prompt(&self) -> String {
        format!(
            "{}\n\n=== CONTENT ===\n{}\n=== END OF CONTENT ===",
            self.framing_context, self.text
        )
    }
}

/// What the capability sent back.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisResponse {
    /// Already-structured JSON.
    Structured(serde_json::Value),
    /// Raw text that may contain JSON (possibly fenced in markdown).
    Text(String),
}

/// An external text-analysis service.
#[async_trait]
pub trait AnalysisCapability: Send + Sync {
    /// Human-readable backend name for logs and reports.
    fn name(&self) -> &str;

    /// Issue one request. Implementations do not retry.
    async fn invoke(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, CapabilityError>;
}

/// System prompt shared by the HTTP backends.
pub(crate) const SYSTEM_PROMPT: &str = r#"You are a monetary policy analyst reviewing central bank communications.
Follow the framing instructions exactly.
Respond with a single valid JSON object and nothing else: no prose, no markdown."#;

/// Build the capability selected in the model settings.
pub fn from_config(config: &ModelConfig) -> Result<Arc<dyn AnalysisCapability>> {
    let capability: Arc<dyn AnalysisCapability> = match config.provider {
        Provider::Ollama => Arc::new(OllamaCapability::new(config)?),
        Provider::Anthropic => Arc::new(AnthropicCapability::new(config)?),
    };
    Ok(capability)
}

/// Map a transport-level reqwest error.
pub(crate) fn map_send_error(
    err: reqwest::Error,
    endpoint: &str,
    timeout: Duration,
) -> CapabilityError {
    if err.is_timeout() {
        CapabilityError::Timeout(timeout)
    } else if err.is_connect() {
        CapabilityError::Unavailable(format!("cannot connect to {}", endpoint))
    } else {
        CapabilityError::Unavailable(format!("failed to send request: {}", err))
    }
}

/// Map a non-success HTTP status. Throttling and server errors are transient.
pub(crate) fn map_status(status: reqwest::StatusCode, body: String) -> CapabilityError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        CapabilityError::Unavailable(format!("API error {}: {}", status, body))
    } else {
        CapabilityError::Rejected {
            status: status.as_u16(),
            message: body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, "slow down".into()),
            CapabilityError::Unavailable(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, String::new()),
            CapabilityError::Unavailable(_)
        ));
        assert_eq!(
            map_status(StatusCode::UNAUTHORIZED, "bad key".into()),
            CapabilityError::Rejected {
                status: 401,
                message: "bad key".into()
            }
        );
    }

    #[test]
    fn test_prompt_wraps_content() {
        let request = AnalysisRequest::for_synthesis(2, "{}".into(), "Combine.".into());
        let prompt = request.prompt();
        assert!(prompt.starts_with("Combine."));
        assert!(prompt.contains("=== CONTENT ===\n{}\n=== END OF CONTENT ==="));
        assert_eq!(request.task, AnalysisTask::Synthesis { parts: 2 });
    }
}
