//! Map stage: analyze one segment in isolation.

use super::dispatch::{Dispatcher, RetryPolicy};
use super::{Pacer, PipelineSettings};
use crate::capability::parse::{ensure_unit_interval, parse_reply, Validate};
use crate::capability::{AnalysisCapability, AnalysisRequest, AnalysisResponse};
use crate::error::ResponseParseError;
use crate::models::{PartialResult, Segment, SegmentFailure, SegmentFindings};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Reply expected for one segment.
#[derive(Debug, Deserialize)]
struct SegmentReply {
    /// Echo of the segment index, if the model reports one.
    #[serde(default)]
    segment_index: Option<usize>,
    #[serde(flatten)]
    findings: SegmentFindings,
}

impl Validate for SegmentReply {
    fn validate(&self) -> Result<(), ResponseParseError> {
        for signal in &self.findings.key_signals {
            if signal.text.trim().is_empty() {
                return Err(ResponseParseError::Invalid(
                    "key signal with empty text".to_string(),
                ));
            }
            ensure_unit_interval("strength", signal.strength)?;
        }
        Ok(())
    }
}

/// Analyzes single segments through the paced capability.
pub struct SegmentAnalyzer {
    dispatcher: Arc<Dispatcher>,
    policy: RetryPolicy,
}

impl SegmentAnalyzer {
    pub fn new(
        capability: Arc<dyn AnalysisCapability>,
        pacer: Arc<Pacer>,
        settings: &PipelineSettings,
    ) -> Self {
        let dispatcher = Dispatcher::new(capability, pacer, settings.call_timeout);
        Self::with_dispatcher(Arc::new(dispatcher), settings.segment_retry())
    }

    pub(crate) fn with_dispatcher(dispatcher: Arc<Dispatcher>, policy: RetryPolicy) -> Self {
        Self { dispatcher, policy }
    }

    /// Analyze one segment. Never fails: errors become a `Failed` result.
    pub async fn analyze(&self, segment: &Segment<'_>, source_label: &str) -> PartialResult {
        let framing = segment_framing(segment, source_label);
        let what = format!("Segment {}/{}", segment.ordinal(), segment.total_count);

        debug!(
            "Analyzing segment {}/{} (chars {}..{})",
            segment.ordinal(),
            segment.total_count,
            segment.start_offset,
            segment.end_offset
        );

        let attempted = self
            .dispatcher
            .call_with_retry(
                self.policy,
                &what,
                |suffix| AnalysisRequest::for_segment(segment, format!("{}{}", framing, suffix)),
                |response| parse_segment_reply(response, segment.index),
            )
            .await;

        match attempted.outcome {
            Ok(findings) => {
                info!(
                    "✓ Segment {}/{}: {} signal(s)",
                    segment.ordinal(),
                    segment.total_count,
                    findings.key_signals.len()
                );
                PartialResult::succeeded(segment.index, findings, attempted.attempts)
            }
            Err(e) => PartialResult::failed(
                segment.index,
                SegmentFailure::from(&e),
                attempted.attempts,
            ),
        }
    }
}

fn parse_segment_reply(
    response: &AnalysisResponse,
    expected_index: usize,
) -> Result<SegmentFindings, ResponseParseError> {
    let reply: SegmentReply = parse_reply(response, "segment analysis")?;
    match reply.segment_index {
        Some(index) if index != expected_index => Err(ResponseParseError::Invalid(format!(
            "reply is for segment {} but segment {} was analyzed",
            index, expected_index
        ))),
        _ => Ok(reply.findings),
    }
}

/// Instructions for one segment, scoped to that segment only.
fn segment_framing(segment: &Segment<'_>, source_label: &str) -> String {
    let scope = if segment.total_count == 1 {
        format!(
            "You are analyzing the complete text (PART 1 of 1) of a {} from the central bank.",
            source_label
        )
    } else {
        format!(
            "You are analyzing PART {} of {} of a {} from the central bank.\n\
             Provide a focused analysis of THIS SECTION ONLY. Other parts are analyzed separately; \
             do not speculate about content that is not in this section.",
            segment.ordinal(),
            segment.total_count,
            source_label
        )
    };

    format!(
        r#"{scope}

Analyze and provide:
1. Key monetary policy signals in this text, each with its polarity and strength (0.0-1.0)
2. The level of concern about inflation
3. The economic growth outlook
4. Any explicit indicators of an upcoming rate change

Respond in JSON format with these exact keys:
{{
  "segment_index": {index},
  "key_signals": [{{"text": "signal", "polarity": "HAWKISH|DOVISH|NEUTRAL", "strength": 0.7}}],
  "inflation_concern": "HIGH|MEDIUM|LOW|UNCLEAR",
  "growth_outlook": "STRONG|MODERATE|WEAK|UNCLEAR",
  "rate_change_indicators": ["indicator"],
  "summary": "Brief summary of this section's key points"
}}"#,
        scope = scope,
        index = segment.index
    )
}
