//! Terminal progress reporting for pipeline runs.

use crate::models::PartialResult;
use crate::pipeline::{RunObserver, RunState};
use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments {msg}";

/// Shows one progress bar per document run.
pub struct SegmentProgress {
    bar: ProgressBar,
    label: String,
}

impl SegmentProgress {
    pub fn new(label: impl Into<String>, visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new(0);
            let style = ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-");
            bar.set_style(style);
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            bar,
            label: label.into(),
        }
    }

    /// Position and length of the bar, for inspection.
    pub fn position(&self) -> (u64, Option<u64>) {
        (self.bar.position(), self.bar.length())
    }
}

impl RunObserver for SegmentProgress {
    fn state_changed(&self, state: RunState) {
        match state {
            RunState::Synthesizing => self.bar.set_message("synthesizing..."),
            RunState::Completed => self
                .bar
                .finish_with_message(format!("✅ {} analyzed", self.label)),
            RunState::Failed => self
                .bar
                .abandon_with_message(format!("❌ {} failed", self.label)),
            _ => {}
        }
    }

    fn segments_planned(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_message(self.label.clone());
    }

    fn segment_finished(&self, result: &PartialResult) {
        if !result.is_success() {
            self.bar
                .println(format!("   ⚠️  part {} failed", result.segment_index + 1));
        }
        self.bar.inc(1);
    }
}
