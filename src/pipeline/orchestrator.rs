//! Pipeline orchestration.
//!
//! Drives one document through segmenting, the concurrent map stage and the
//! reduce stage. Map results are slotted by segment index, so the order in
//! which calls complete never reaches the synthesizer.

use super::analyzer::SegmentAnalyzer;
use super::dispatch::Dispatcher;
use super::segmenter::segment;
use super::synthesizer::Synthesizer;
use super::{Pacer, PipelineSettings, RunState};
use crate::capability::AnalysisCapability;
use crate::error::{ConfigError, PipelineError, RunFailure};
use crate::models::{Coverage, Document, PartialResult, SynthesizedResult};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives progress notifications from a run.
pub trait RunObserver: Send + Sync {
    fn state_changed(&self, _state: RunState) {}

    /// Called once the segment count is known, before any analysis.
    fn segments_planned(&self, _total: usize) {}

    /// Called as each segment reaches a terminal status, in completion order.
    fn segment_finished(&self, _result: &PartialResult) {}
}

/// A completed run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub result: SynthesizedResult,
    /// One entry per segment, ordered by segment index.
    pub partials: Vec<PartialResult>,
    pub segment_count: usize,
    /// Whether the document needed more than one segment.
    pub chunked: bool,
}

/// Map-reduce analysis of whole documents.
pub struct Pipeline {
    capability: Arc<dyn AnalysisCapability>,
    settings: PipelineSettings,
    pacer: Arc<Pacer>,
    observer: Option<Arc<dyn RunObserver>>,
}

impl Pipeline {
    /// Create a pipeline with its own pacer.
    pub fn new(
        capability: Arc<dyn AnalysisCapability>,
        settings: PipelineSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let pacer = Arc::new(Pacer::new(
            settings.max_concurrent_calls,
            settings.min_call_spacing,
        ));
        Ok(Self {
            capability,
            settings,
            pacer,
            observer: None,
        })
    }

    /// Share a pacer with other pipelines hitting the same service.
    pub fn with_pacer(mut self, pacer: Arc<Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn pacer(&self) -> &Arc<Pacer> {
        &self.pacer
    }

    /// Analyze one document.
    ///
    /// Cancelling `cancel` stops the run at the next await point; in-flight
    /// calls are dropped and their pacer slots returned.
    pub async fn run(
        &self,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, RunFailure> {
        if cancel.is_cancelled() {
            return Err(self.fail(PipelineError::Cancelled, RunState::NotStarted, 0, Vec::new()));
        }

        self.enter(RunState::Segmenting);
        let segments = segment(
            &document.text,
            self.settings.max_segment_size,
            self.settings.overlap_size,
        )
        .map_err(|e| self.fail(e, RunState::Segmenting, 0, Vec::new()))?;

        if segments.is_empty() {
            return Err(self.fail(
                PipelineError::EmptyDocument,
                RunState::Segmenting,
                0,
                Vec::new(),
            ));
        }

        let total = segments.len();
        let chunked = total > 1;
        if chunked {
            info!(
                "{}: {} chars, chunked into {} segments",
                document.source_label,
                document.char_len(),
                total
            );
        } else {
            info!("{}: single segment", document.source_label);
        }
        if let Some(observer) = &self.observer {
            observer.segments_planned(total);
        }

        let dispatcher = Arc::new(Dispatcher::new(
            self.capability.clone(),
            self.pacer.clone(),
            self.settings.call_timeout,
        ));

        // Map stage
        self.enter(RunState::Analyzing);
        let analyzer =
            SegmentAnalyzer::with_dispatcher(dispatcher.clone(), self.settings.segment_retry());
        let mut slots: Vec<Option<PartialResult>> = vec![None; total];

        let map_stage = async {
            let mut results = stream::iter(segments.iter())
                .map(|seg| analyzer.analyze(seg, &document.source_label))
                .buffer_unordered(self.settings.max_concurrent_calls);

            while let Some(partial) = results.next().await {
                debug!(
                    "Segment {} finished ({} attempt(s))",
                    partial.segment_index + 1,
                    partial.attempts
                );
                if let Some(observer) = &self.observer {
                    observer.segment_finished(&partial);
                }
                let index = partial.segment_index;
                if let Some(slot) = slots.get_mut(index) {
                    *slot = Some(partial);
                }
            }
        };

        let cancelled = tokio::select! {
            biased;
            _ = cancel.cancelled() => true,
            _ = map_stage => false,
        };

        let partials: Vec<PartialResult> = slots.into_iter().flatten().collect();
        if cancelled {
            warn!(
                "{}: cancelled with {}/{} segments finished",
                document.source_label,
                partials.len(),
                total
            );
            return Err(self.fail(PipelineError::Cancelled, RunState::Analyzing, total, partials));
        }

        let coverage = Coverage::from_partials(&partials);
        info!("{}: {}", document.source_label, coverage);

        // Reduce stage
        self.enter(RunState::Synthesizing);
        let synthesizer = Synthesizer::with_dispatcher(dispatcher, &self.settings);

        let synthesis = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            result = synthesizer.synthesize(&partials, &document.source_label) => result,
        };

        match synthesis {
            Ok(result) => {
                self.enter(RunState::Completed);
                Ok(PipelineOutcome {
                    result,
                    partials,
                    segment_count: total,
                    chunked,
                })
            }
            Err(e) => Err(self.fail(e, RunState::Synthesizing, total, partials)),
        }
    }

    fn enter(&self, state: RunState) {
        debug!("Pipeline state: {}", state);
        if let Some(observer) = &self.observer {
            observer.state_changed(state);
        }
    }

    fn fail(
        &self,
        error: PipelineError,
        state: RunState,
        total: usize,
        partials: Vec<PartialResult>,
    ) -> RunFailure {
        let mut coverage = Coverage::from_partials(&partials);
        coverage.total = total;

        warn!("Pipeline failed while {}: {}", state, error);
        self.enter(RunState::Failed);

        RunFailure {
            error,
            state,
            coverage,
            partials,
        }
    }
}
