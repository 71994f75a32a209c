//! Data models for the analysis pipeline.
//!
//! This module contains the core data structures that flow through the
//! pipeline: documents and their segments, per-segment partial results,
//! the synthesized final assessment, and the report built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A text document submitted for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Full document text.
    pub text: String,
    /// Free-form classification tag (e.g. "Press Release") used in framing.
    pub source_label: String,
}

impl Document {
    pub fn new(text: impl Into<String>, source_label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_label: source_label.into(),
        }
    }

    /// Length in characters, the unit segment sizes are measured in.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A bounded, possibly overlapping slice of a [`Document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    /// Position of this segment (0-based).
    pub index: usize,
    /// Number of segments the document was split into.
    pub total_count: usize,
    /// The slice of the document covered by this segment.
    pub text: &'a str,
    /// Character offset of the first character (inclusive).
    pub start_offset: usize,
    /// Character offset one past the last character (exclusive).
    pub end_offset: usize,
}

impl Segment<'_> {
    /// 1-based position, as used in "part K of N" framing.
    pub fn ordinal(&self) -> usize {
        self.index + 1
    }

    pub fn is_final(&self) -> bool {
        self.index + 1 == self.total_count
    }

    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

/// Overall monetary policy stance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stance {
    /// Rate increases likely
    Hawkish,
    /// Rate cuts likely
    Dovish,
    /// Balanced, no clear direction
    Neutral,
    /// Maintaining current rates
    Hold,
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stance::Hawkish => write!(f, "HAWKISH"),
            Stance::Dovish => write!(f, "DOVISH"),
            Stance::Neutral => write!(f, "NEUTRAL"),
            Stance::Hold => write!(f, "HOLD"),
        }
    }
}

impl Stance {
    /// Returns an emoji representation of the stance.
    pub fn emoji(&self) -> &'static str {
        match self {
            Stance::Hawkish => "🔴",
            Stance::Dovish => "🟢",
            Stance::Neutral => "🟡",
            Stance::Hold => "🔵",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Stance::Hawkish => "Rate increases likely",
            Stance::Dovish => "Rate cuts likely",
            Stance::Neutral => "No clear direction",
            Stance::Hold => "Maintaining current rate",
        }
    }
}

/// Expected direction of the next rate change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
    #[serde(rename = "NONE")]
    Unchanged,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
            Direction::Unchanged => write!(f, "NONE"),
        }
    }
}

/// Which way a single signal leans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Polarity {
    Hawkish,
    Dovish,
    Neutral,
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Hawkish => write!(f, "hawkish"),
            Polarity::Dovish => write!(f, "dovish"),
            Polarity::Neutral => write!(f, "neutral"),
        }
    }
}

/// Qualitative level of concern about inflation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InflationConcern {
    High,
    Medium,
    Low,
    Unclear,
}

impl fmt::Display for InflationConcern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InflationConcern::High => write!(f, "HIGH"),
            InflationConcern::Medium => write!(f, "MEDIUM"),
            InflationConcern::Low => write!(f, "LOW"),
            InflationConcern::Unclear => write!(f, "UNCLEAR"),
        }
    }
}

/// Qualitative view of economic growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GrowthOutlook {
    Strong,
    Moderate,
    Weak,
    Unclear,
}

impl fmt::Display for GrowthOutlook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrowthOutlook::Strong => write!(f, "STRONG"),
            GrowthOutlook::Moderate => write!(f, "MODERATE"),
            GrowthOutlook::Weak => write!(f, "WEAK"),
            GrowthOutlook::Unclear => write!(f, "UNCLEAR"),
        }
    }
}

/// A policy signal found in one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSignal {
    /// The phrase or indicator, as quoted or paraphrased from the text.
    pub text: String,
    pub polarity: Polarity,
    /// How strongly the signal leans, in [0, 1].
    pub strength: f64,
}

/// Structured payload of a successfully analyzed segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentFindings {
    pub key_signals: Vec<SegmentSignal>,
    pub inflation_concern: InflationConcern,
    pub growth_outlook: GrowthOutlook,
    /// Explicit hints about upcoming rate moves in this segment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rate_change_indicators: Vec<String>,
    /// Free-text notes on the segment's key points.
    pub summary: String,
}

/// Classification of a failed segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Timeout,
    Unavailable,
    Rejected,
    MalformedOutput,
    InvalidPayload,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "Timeout"),
            FailureKind::Unavailable => write!(f, "Unavailable"),
            FailureKind::Rejected => write!(f, "Rejected"),
            FailureKind::MalformedOutput => write!(f, "Malformed output"),
            FailureKind::InvalidPayload => write!(f, "Invalid payload"),
        }
    }
}

/// Why a segment ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&crate::error::SegmentAnalysisError> for SegmentFailure {
    fn from(err: &crate::error::SegmentAnalysisError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Terminal status of one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SegmentStatus {
    Succeeded(SegmentFindings),
    Failed(SegmentFailure),
}

/// Output of analyzing one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    pub segment_index: usize,
    /// Capability calls spent on this segment.
    pub attempts: u32,
    pub analyzed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: SegmentStatus,
}

impl PartialResult {
    pub fn succeeded(segment_index: usize, findings: SegmentFindings, attempts: u32) -> Self {
        Self {
            segment_index,
            attempts,
            analyzed_at: Utc::now(),
            status: SegmentStatus::Succeeded(findings),
        }
    }

    pub fn failed(segment_index: usize, failure: SegmentFailure, attempts: u32) -> Self {
        Self {
            segment_index,
            attempts,
            analyzed_at: Utc::now(),
            status: SegmentStatus::Failed(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, SegmentStatus::Succeeded(_))
    }

    pub fn findings(&self) -> Option<&SegmentFindings> {
        match &self.status {
            SegmentStatus::Succeeded(findings) => Some(findings),
            SegmentStatus::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&SegmentFailure> {
        match &self.status {
            SegmentStatus::Succeeded(_) => None,
            SegmentStatus::Failed(failure) => Some(failure),
        }
    }
}

/// How many segments of a document were successfully analyzed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl Coverage {
    pub fn from_partials(partials: &[PartialResult]) -> Self {
        let succeeded = partials.iter().filter(|p| p.is_success()).count();
        Self {
            total: partials.len(),
            succeeded,
            failed: partials.len() - succeeded,
        }
    }

    /// Fraction of segments that succeeded (0 for an empty document).
    pub fn succeeded_fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }

    pub fn failed_fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.failed == 0
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} segments succeeded ({:.0}%)",
            self.succeeded,
            self.total,
            self.succeeded_fraction() * 100.0
        )
    }
}

/// A signal selected for the final assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSignal {
    pub text: String,
    /// How strongly the signal moves the rate outlook, in [0, 1].
    pub importance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polarity: Option<Polarity>,
    /// Segment indices (0-based, ascending) whose analysis supports the signal.
    pub supporting_segments: Vec<usize>,
}

impl RankedSignal {
    /// Earliest supporting segment, used to break importance ties.
    pub fn earliest_segment(&self) -> usize {
        self.supporting_segments
            .iter()
            .copied()
            .min()
            .unwrap_or(usize::MAX)
    }

    /// Supporting segments as 1-based part numbers, e.g. "1, 3".
    pub fn parts_label(&self) -> String {
        self.supporting_segments
            .iter()
            .map(|i| (i + 1).to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Final assessment of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedResult {
    pub source_label: String,
    pub stance: Stance,
    /// Confidence after the coverage penalty, in [0, 1].
    pub confidence: f64,
    /// Confidence as reported by the capability (clamped), before the penalty.
    pub raw_confidence: f64,
    /// Probability of a rate change in the next three months, in [0, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_change_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// Most salient signals, at most `top_signal_count`.
    pub top_signals: Vec<RankedSignal>,
    pub inflation_concern: InflationConcern,
    pub growth_outlook: GrowthOutlook,
    pub summary: String,
    pub coverage: Coverage,
    /// Set when the failed fraction exceeded the tolerance threshold.
    pub degraded: bool,
    pub analyzed_at: DateTime<Utc>,
}

/// Metadata about the analysis report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Date and time the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Capability backend used.
    pub provider: String,
    /// Name of the LLM model used.
    pub model_used: String,
    /// Number of documents submitted.
    pub documents_analyzed: usize,
    /// Number of documents whose run failed.
    pub documents_failed: usize,
    /// Duration of the whole run in seconds.
    pub duration_seconds: f64,
}

/// How one document's run ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum DocumentOutcome {
    Completed {
        result: SynthesizedResult,
        partials: Vec<PartialResult>,
    },
    Failed {
        /// Error kind, e.g. `AllSegmentsFailed`.
        error_kind: String,
        message: String,
        /// Pipeline state at the time of failure.
        state: String,
        coverage: Coverage,
        partials: Vec<PartialResult>,
    },
}

/// One analyzed document within a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    pub source_label: String,
    /// Where the text was read from.
    pub origin: String,
    /// Document length in characters.
    pub char_count: usize,
    #[serde(flatten)]
    pub outcome: DocumentOutcome,
}

impl DocumentReport {
    pub fn result(&self) -> Option<&SynthesizedResult> {
        match &self.outcome {
            DocumentOutcome::Completed { result, .. } => Some(result),
            DocumentOutcome::Failed { .. } => None,
        }
    }

    pub fn partials(&self) -> &[PartialResult] {
        match &self.outcome {
            DocumentOutcome::Completed { partials, .. } => partials,
            DocumentOutcome::Failed { partials, .. } => partials,
        }
    }
}

/// Cross-document summary statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateSummary {
    /// Number of documents with a synthesized result.
    pub sources: usize,
    pub hawkish: usize,
    pub dovish: usize,
    pub neutral: usize,
    pub hold: usize,
    pub average_confidence: Option<f64>,
    pub average_rate_change_probability: Option<f64>,
}

impl AggregateSummary {
    /// Creates a summary from the synthesized results of a run.
    pub fn from_results(results: &[&SynthesizedResult]) -> Self {
        let mut summary = Self {
            sources: results.len(),
            ..Self::default()
        };

        for result in results {
            match result.stance {
                Stance::Hawkish => summary.hawkish += 1,
                Stance::Dovish => summary.dovish += 1,
                Stance::Neutral => summary.neutral += 1,
                Stance::Hold => summary.hold += 1,
            }
        }

        summary.average_confidence = crate::analysis::average_confidence(results);
        summary.average_rate_change_probability =
            crate::analysis::average_rate_change_probability(results);

        summary
    }
}

/// The complete analysis report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub documents: Vec<DocumentReport>,
    pub aggregate: AggregateSummary,
}
