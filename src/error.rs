//! Error types for the analysis pipeline.
//!
//! Errors are layered the same way the pipeline is: capability errors come
//! from a single outbound call, segment analysis errors wrap those plus
//! response parsing problems, and pipeline errors end a whole run.

use crate::models::{Coverage, FailureKind, PartialResult};
use crate::pipeline::RunState;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single call to the analysis capability.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    /// The call did not complete within its own timeout.
    #[error("capability call timed out after {0:?}")]
    Timeout(Duration),

    /// The service could not be reached or asked us to back off.
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request; retrying the same request won't help.
    #[error("capability rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The transport succeeded but the body could not be decoded.
    #[error("capability returned an unreadable response: {0}")]
    Malformed(String),
}

impl CapabilityError {
    /// Whether another attempt at the same request may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, CapabilityError::Rejected { .. })
    }

    /// Classification recorded on failed segments.
    pub fn kind(&self) -> FailureKind {
        match self {
            CapabilityError::Timeout(_) => FailureKind::Timeout,
            CapabilityError::Unavailable(_) => FailureKind::Unavailable,
            CapabilityError::Rejected { .. } => FailureKind::Rejected,
            CapabilityError::Malformed(_) => FailureKind::MalformedOutput,
        }
    }
}

/// The capability answered, but not with a usable structured payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResponseParseError {
    #[error("no JSON object found in response")]
    NoJson,

    #[error("response is not a valid {expected}: {message}")]
    Json {
        expected: &'static str,
        message: String,
    },

    #[error("response failed validation: {0}")]
    Invalid(String),
}

impl ResponseParseError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ResponseParseError::NoJson | ResponseParseError::Json { .. } => {
                FailureKind::MalformedOutput
            }
            ResponseParseError::Invalid(_) => FailureKind::InvalidPayload,
        }
    }
}

/// Error from one analysis attempt (map stage or reduce stage).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SegmentAnalysisError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Parse(#[from] ResponseParseError),
}

impl SegmentAnalysisError {
    /// Transient capability failures and unusable replies are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SegmentAnalysisError::Capability(e) => e.is_transient(),
            SegmentAnalysisError::Parse(_) => true,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            SegmentAnalysisError::Capability(e) => e.kind(),
            SegmentAnalysisError::Parse(e) => e.kind(),
        }
    }
}

/// Error that ends a pipeline run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// Segmenter settings that cannot produce a terminating split.
    #[error("invalid segmentation settings: {0}")]
    SegmentationConfig(String),

    /// Nothing to analyze.
    #[error("document is empty; no analysis possible")]
    EmptyDocument,

    /// Every segment ended in `Failed`; the reduce stage was not attempted.
    #[error("all {total} segment(s) failed analysis")]
    AllSegmentsFailed { total: usize },

    /// The reduce call exhausted its own retry budget.
    #[error("synthesis failed after {attempts} attempt(s): {source}")]
    SynthesisFailed {
        attempts: u32,
        #[source]
        source: SegmentAnalysisError,
    },

    /// The caller cancelled the run.
    #[error("pipeline run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Stable name of the error kind, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SegmentationConfig(_) => "SegmentationConfigError",
            PipelineError::EmptyDocument => "EmptyDocument",
            PipelineError::AllSegmentsFailed { .. } => "AllSegmentsFailed",
            PipelineError::SynthesisFailed { .. } => "SynthesisFailed",
            PipelineError::Cancelled => "Cancelled",
        }
    }
}

/// A run that ended in the `Failed` state.
///
/// Carries how far the run got so a caller can decide whether to retry the
/// whole document or keep the partial results.
#[derive(Debug, Error)]
#[error("{error} (failed while {state}; {coverage})")]
pub struct RunFailure {
    #[source]
    pub error: PipelineError,
    /// State the run was in when the error occurred.
    pub state: RunState,
    /// Segment counts at the time of failure.
    pub coverage: Coverage,
    /// Segment results collected before the failure, ordered by index.
    pub partials: Vec<PartialResult>,
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be {requirement} (got {value})")]
    OutOfRange {
        field: &'static str,
        requirement: &'static str,
        value: String,
    },
}

impl ConfigError {
    pub(crate) fn out_of_range(
        field: &'static str,
        requirement: &'static str,
        value: impl ToString,
    ) -> Self {
        ConfigError::OutOfRange {
            field,
            requirement,
            value: value.to_string(),
        }
    }
}
