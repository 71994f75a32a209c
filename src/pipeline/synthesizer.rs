//! Reduce stage: combine per-segment findings into one assessment.
//!
//! The capability sees only the structured payloads of succeeded segments,
//! never raw segment text. Everything after the reply is deterministic:
//! scores are clamped, signals are tied back to the segments that support
//! them, ranked and truncated, and confidence is penalized for coverage.

use super::dispatch::{Dispatcher, RetryPolicy};
use super::{Pacer, PipelineSettings};
use crate::analysis::{collect_signal_candidates, find_candidate, rank_signals, SignalCandidate};
use crate::capability::parse::{parse_reply, Validate};
use crate::capability::{AnalysisCapability, AnalysisRequest};
use crate::error::{PipelineError, ResponseParseError};
use crate::models::{
    Coverage, Direction, GrowthOutlook, InflationConcern, PartialResult, Polarity, RankedSignal,
    SegmentSignal, Stance, SynthesizedResult,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Reduce-stage request payload.
#[derive(Debug, Serialize)]
struct SynthesisInput<'a> {
    source_label: &'a str,
    total_segments: usize,
    /// Segments whose analysis failed and are absent from `segments`.
    failed_segments: Vec<usize>,
    segments: Vec<SegmentDigest<'a>>,
    /// Signals pooled across segments, with the segments that reported them.
    candidate_signals: &'a [SignalCandidate],
}

#[derive(Debug, Serialize)]
struct SegmentDigest<'a> {
    segment_index: usize,
    key_signals: &'a [SegmentSignal],
    inflation_concern: InflationConcern,
    growth_outlook: GrowthOutlook,
    rate_change_indicators: &'a [String],
    summary: &'a str,
}

/// Reply expected from the reduce call.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SynthesisReply {
    pub stance: Stance,
    pub confidence: f64,
    #[serde(default)]
    pub rate_change_probability: Option<f64>,
    #[serde(default)]
    pub direction: Option<Direction>,
    pub key_signals: Vec<ReplySignal>,
    pub inflation_concern: InflationConcern,
    pub growth_outlook: GrowthOutlook,
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReplySignal {
    pub signal: String,
    pub importance: f64,
    #[serde(default)]
    pub polarity: Option<Polarity>,
    /// Cited segment indices.
    #[serde(default)]
    pub segments: Vec<usize>,
}

impl Validate for SynthesisReply {
    // Scores are clamped after parsing rather than rejected.
    fn validate(&self) -> Result<(), ResponseParseError> {
        if self.summary.trim().is_empty() {
            return Err(ResponseParseError::Invalid(
                "synthesis summary is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Combines partial results into a [`SynthesizedResult`].
pub struct Synthesizer {
    dispatcher: Arc<Dispatcher>,
    policy: RetryPolicy,
    top_signal_count: usize,
    failure_tolerance_fraction: f64,
    degraded_confidence_cap: f64,
}

impl Synthesizer {
    pub fn new(
        capability: Arc<dyn AnalysisCapability>,
        pacer: Arc<Pacer>,
        settings: &PipelineSettings,
    ) -> Self {
        let dispatcher = Dispatcher::new(capability, pacer, settings.call_timeout);
        Self::with_dispatcher(Arc::new(dispatcher), settings)
    }

    pub(crate) fn with_dispatcher(
        dispatcher: Arc<Dispatcher>,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            dispatcher,
            policy: settings.synthesis_retry(),
            top_signal_count: settings.top_signal_count,
            failure_tolerance_fraction: settings.failure_tolerance_fraction,
            degraded_confidence_cap: settings.degraded_confidence_cap,
        }
    }

    /// Synthesize the final assessment from every segment's result.
    ///
    /// `partials` must hold one entry per segment, `Failed` ones included.
    /// Fails without calling the capability when nothing succeeded.
    pub async fn synthesize(
        &self,
        partials: &[PartialResult],
        source_label: &str,
    ) -> Result<SynthesizedResult, PipelineError> {
        let coverage = Coverage::from_partials(partials);
        if coverage.succeeded == 0 {
            return Err(PipelineError::AllSegmentsFailed {
                total: coverage.total,
            });
        }

        let candidates = collect_signal_candidates(partials);
        let payload = synthesis_payload(partials, &candidates, source_label);
        let framing = synthesis_framing(source_label, &coverage, self.top_signal_count);

        info!(
            "Synthesizing {} of {} segment analyses for {}",
            coverage.succeeded, coverage.total, source_label
        );

        let attempted = self
            .dispatcher
            .call_with_retry(
                self.policy,
                "Synthesis",
                |suffix| {
                    AnalysisRequest::for_synthesis(
                        coverage.succeeded,
                        payload.clone(),
                        format!("{}{}", framing, suffix),
                    )
                },
                |response| parse_reply::<SynthesisReply>(response, "synthesis"),
            )
            .await;

        let reply = attempted
            .outcome
            .map_err(|source| PipelineError::SynthesisFailed {
                attempts: attempted.attempts,
                source,
            })?;

        let result = self.finish(reply, partials, &candidates, coverage, source_label);
        if result.degraded {
            warn!("{}: only {}, result flagged as degraded", source_label, coverage);
        }
        Ok(result)
    }

    /// Deterministic post-processing of a parsed reply.
    pub(crate) fn finish(
        &self,
        reply: SynthesisReply,
        partials: &[PartialResult],
        candidates: &[SignalCandidate],
        coverage: Coverage,
        source_label: &str,
    ) -> SynthesizedResult {
        let succeeded: Vec<usize> = partials
            .iter()
            .filter(|p| p.is_success())
            .map(|p| p.segment_index)
            .collect();

        let signals: Vec<RankedSignal> = reply
            .key_signals
            .into_iter()
            .filter_map(|signal| resolve_signal(signal, &succeeded, candidates))
            .collect();

        let raw_confidence = clamp_unit(reply.confidence);
        let (confidence, degraded) = adjust_confidence(
            raw_confidence,
            &coverage,
            self.failure_tolerance_fraction,
            self.degraded_confidence_cap,
        );

        SynthesizedResult {
            source_label: source_label.to_string(),
            stance: reply.stance,
            confidence,
            raw_confidence,
            rate_change_probability: reply.rate_change_probability.map(clamp_unit),
            direction: reply.direction,
            top_signals: rank_signals(signals, self.top_signal_count),
            inflation_concern: reply.inflation_concern,
            growth_outlook: reply.growth_outlook,
            summary: reply.summary.trim().to_string(),
            coverage,
            degraded,
            analyzed_at: Utc::now(),
        }
    }
}

/// Tie a reply signal to the succeeded segments supporting it.
///
/// Cited indices are kept only if they name a succeeded segment; otherwise
/// the pooled candidates are searched by text. Unsupported signals are dropped.
fn resolve_signal(
    signal: ReplySignal,
    succeeded: &[usize],
    candidates: &[SignalCandidate],
) -> Option<RankedSignal> {
    let text = signal.signal.trim();
    if text.is_empty() {
        return None;
    }

    let mut supporting: Vec<usize> = signal
        .segments
        .iter()
        .copied()
        .filter(|index| succeeded.contains(index))
        .collect();
    supporting.sort_unstable();
    supporting.dedup();

    let candidate = find_candidate(candidates, text);
    if supporting.is_empty() {
        supporting = candidate.map(|c| c.supporting_segments.clone())?;
    }

    Some(RankedSignal {
        text: text.to_string(),
        importance: clamp_unit(signal.importance),
        polarity: signal.polarity.or_else(|| candidate.map(|c| c.polarity)),
        supporting_segments: supporting,
    })
}

/// Clamp a score into [0, 1]. NaN becomes 0.
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Apply the coverage penalty to a clamped confidence.
///
/// Confidence scales with the succeeded fraction. Above the failure tolerance
/// the result is degraded and confidence is also capped.
pub(crate) fn adjust_confidence(
    raw_confidence: f64,
    coverage: &Coverage,
    failure_tolerance_fraction: f64,
    degraded_confidence_cap: f64,
) -> (f64, bool) {
    let scaled = clamp_unit(raw_confidence) * coverage.succeeded_fraction();
    let degraded = coverage.failed_fraction() > failure_tolerance_fraction;
    if degraded {
        (scaled.min(degraded_confidence_cap), true)
    } else {
        (scaled, false)
    }
}

fn synthesis_payload(
    partials: &[PartialResult],
    candidates: &[SignalCandidate],
    source_label: &str,
) -> String {
    let mut ordered: Vec<&PartialResult> = partials.iter().collect();
    ordered.sort_by_key(|p| p.segment_index);

    let failed_segments = ordered
        .iter()
        .filter(|p| !p.is_success())
        .map(|p| p.segment_index)
        .collect();

    let segments = ordered
        .iter()
        .filter_map(|p| {
            p.findings().map(|f| SegmentDigest {
                segment_index: p.segment_index,
                key_signals: &f.key_signals,
                inflation_concern: f.inflation_concern,
                growth_outlook: f.growth_outlook,
                rate_change_indicators: &f.rate_change_indicators,
                summary: &f.summary,
            })
        })
        .collect();

    let input = SynthesisInput {
        source_label,
        total_segments: partials.len(),
        failed_segments,
        segments,
        candidate_signals: candidates,
    };

    serde_json::to_string_pretty(&input).unwrap_or_else(|_| "{}".to_string())
}

fn synthesis_framing(source_label: &str, coverage: &Coverage, top_signal_count: usize) -> String {
    let gaps = if coverage.failed > 0 {
        format!(
            "\n{} of the {} segments could not be analyzed; base your assessment only on the \
             segments present and do not guess at the missing ones.",
            coverage.failed, coverage.total
        )
    } else {
        String::new()
    };

    format!(
        r#"You analyzed a {source_label} from the central bank in {total} segment(s).
The content below holds the structured analysis of each segment (identified by segment_index)
and the signals pooled across segments with the segments that reported them.{gaps}

Now provide a FINAL OVERALL analysis synthesizing all segments. Consider:
- What is the overall policy stance across the entire document?
- What are the most important signals? Pick at most {top}, ranked by importance
  (0.0-1.0: how strongly the signal moves the rate outlook), and cite the
  segment_index values that support each one.
- What is the probability of a rate change in the next 3 months (0.0-1.0)?
- Overall inflation concern and growth outlook?

Respond in JSON format with these exact keys:
{{
  "stance": "HAWKISH|DOVISH|NEUTRAL|HOLD",
  "confidence": 0.85,
  "rate_change_probability": 0.6,
  "direction": "UP|DOWN|NONE",
  "key_signals": [{{"signal": "top signal", "importance": 0.9, "polarity": "HAWKISH|DOVISH|NEUTRAL", "segments": [0, 2]}}],
  "inflation_concern": "HIGH|MEDIUM|LOW|UNCLEAR",
  "growth_outlook": "STRONG|MODERATE|WEAK|UNCLEAR",
  "summary": "2-3 sentence synthesis of the overall message"
}}"#,
        source_label = source_label,
        total = coverage.total,
        gaps = gaps,
        top = top_signal_count
    )
}
