//! Chunked document analysis pipeline.
//!
//! A document is split into overlapping segments, every segment is analyzed
//! independently through the capability (the map stage), and the
//! per-segment findings are combined into one assessment (the reduce stage).
//! All outbound calls go through a shared [`Pacer`].

pub mod analyzer;
mod dispatch;
pub mod orchestrator;
pub mod pacer;
pub mod segmenter;
pub mod synthesizer;

pub use analyzer::SegmentAnalyzer;
pub use dispatch::RetryPolicy;
pub use orchestrator::{Pipeline, PipelineOutcome, RunObserver};
pub use pacer::{Pacer, PacerClosed, PacerPermit};
pub use segmenter::segment;
pub use synthesizer::Synthesizer;

use crate::config::PipelineConfig;
use crate::error::ConfigError;
use std::fmt;
use std::time::Duration;

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    NotStarted,
    Segmenting,
    Analyzing,
    Synthesizing,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "not started"),
            RunState::Segmenting => write!(f, "segmenting"),
            RunState::Analyzing => write!(f, "analyzing"),
            RunState::Synthesizing => write!(f, "synthesizing"),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// Runtime settings for one [`Pipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Largest segment, in characters.
    pub max_segment_size: usize,
    /// Characters shared by consecutive segments.
    pub overlap_size: usize,
    pub max_concurrent_calls: usize,
    /// Minimum gap between consecutive call starts.
    pub min_call_spacing: Duration,
    /// Total attempts per segment, including the first.
    pub retry_budget_per_segment: u32,
    /// Total attempts for the reduce call.
    pub synthesis_retry_budget: u32,
    pub retry_pause: Duration,
    /// Timeout applied to each individual capability call.
    pub call_timeout: Duration,
    /// Failed fraction above which a result is flagged degraded.
    pub failure_tolerance_fraction: f64,
    /// Confidence ceiling for degraded results.
    pub degraded_confidence_cap: f64,
    pub top_signal_count: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_segment_size: config.max_segment_size,
            overlap_size: config.overlap_size,
            max_concurrent_calls: config.max_concurrent_calls,
            min_call_spacing: Duration::from_millis(config.min_call_spacing_ms),
            retry_budget_per_segment: config.retry_budget_per_segment,
            synthesis_retry_budget: config.synthesis_retry_budget,
            retry_pause: Duration::from_millis(config.retry_pause_ms),
            call_timeout: Duration::from_secs(config.call_timeout_seconds),
            failure_tolerance_fraction: config.failure_tolerance_fraction,
            degraded_confidence_cap: config.degraded_confidence_cap,
            top_signal_count: config.top_signal_count,
        }
    }
}

impl PipelineSettings {
    /// Check value ranges.
    ///
    /// Segment size against overlap is left to the segmenter, which reports
    /// it as a run failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::out_of_range(
                "max_concurrent_calls",
                "at least 1",
                self.max_concurrent_calls,
            ));
        }
        if self.retry_budget_per_segment == 0 {
            return Err(ConfigError::out_of_range(
                "retry_budget_per_segment",
                "at least 1",
                self.retry_budget_per_segment,
            ));
        }
        if self.synthesis_retry_budget == 0 {
            return Err(ConfigError::out_of_range(
                "synthesis_retry_budget",
                "at least 1",
                self.synthesis_retry_budget,
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::out_of_range(
                "call_timeout",
                "greater than zero",
                format!("{:?}", self.call_timeout),
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_tolerance_fraction) {
            return Err(ConfigError::out_of_range(
                "failure_tolerance_fraction",
                "between 0 and 1",
                self.failure_tolerance_fraction,
            ));
        }
        if !(0.0..=1.0).contains(&self.degraded_confidence_cap) {
            return Err(ConfigError::out_of_range(
                "degraded_confidence_cap",
                "between 0 and 1",
                self.degraded_confidence_cap,
            ));
        }
        if self.top_signal_count == 0 {
            return Err(ConfigError::out_of_range(
                "top_signal_count",
                "at least 1",
                self.top_signal_count,
            ));
        }
        Ok(())
    }

    pub(crate) fn segment_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_budget_per_segment, self.retry_pause)
    }

    pub(crate) fn synthesis_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.synthesis_retry_budget, self.retry_pause)
    }
}
