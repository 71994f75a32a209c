//! Signal pooling and summary statistics.
//!
//! This module provides utilities for pooling signals across segments,
//! ranking the signals of a synthesized result, and computing cross-document
//! statistics for the report.

use crate::models::{
    AggregateSummary, FailureKind, PartialResult, Polarity, RankedSignal, SynthesizedResult,
};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A signal seen in one or more segments, before synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalCandidate {
    /// Text as first reported.
    pub text: String,
    #[serde(skip)]
    pub normalized: String,
    pub polarity: Polarity,
    /// Highest strength any segment gave this signal.
    pub max_strength: f64,
    /// Segment indices (ascending) that reported the signal.
    pub supporting_segments: Vec<usize>,
}

/// Canonical form used to match signal texts: lowercase alphanumerics,
/// single-spaced.
pub fn normalize_signal(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pool the signals of all succeeded segments, merging repeats.
///
/// Candidates keep first-appearance order; partials may be in any order.
pub fn collect_signal_candidates(partials: &[PartialResult]) -> Vec<SignalCandidate> {
    let mut ordered: Vec<&PartialResult> = partials.iter().collect();
    ordered.sort_by_key(|p| p.segment_index);

    let mut candidates: Vec<SignalCandidate> = Vec::new();

    for partial in ordered {
        let Some(findings) = partial.findings() else {
            continue;
        };

        for signal in &findings.key_signals {
            let normalized = normalize_signal(&signal.text);
            if normalized.is_empty() {
                continue;
            }

            match candidates.iter_mut().find(|c| c.normalized == normalized) {
                Some(existing) => {
                    existing.max_strength = existing.max_strength.max(signal.strength);
                    if !existing.supporting_segments.contains(&partial.segment_index) {
                        existing.supporting_segments.push(partial.segment_index);
                    }
                }
                None => candidates.push(SignalCandidate {
                    text: signal.text.trim().to_string(),
                    normalized,
                    polarity: signal.polarity,
                    max_strength: signal.strength,
                    supporting_segments: vec![partial.segment_index],
                }),
            }
        }
    }

    candidates
}

/// Find the pooled candidate matching a signal text.
pub fn find_candidate<'a>(
    candidates: &'a [SignalCandidate],
    text: &str,
) -> Option<&'a SignalCandidate> {
    let normalized = normalize_signal(text);
    candidates.iter().find(|c| c.normalized == normalized)
}

/// Merge duplicate signals, order them and keep the top `n`.
///
/// Order is importance descending, then earliest supporting segment, then
/// text, so the result does not depend on the input order.
pub fn rank_signals(signals: Vec<RankedSignal>, n: usize) -> Vec<RankedSignal> {
    let mut merged: Vec<(String, RankedSignal)> = Vec::new();

    for signal in signals {
        let normalized = normalize_signal(&signal.text);
        match merged.iter_mut().find(|(key, _)| *key == normalized) {
            Some((_, existing)) => {
                existing.importance = existing.importance.max(signal.importance);
                if existing.polarity.is_none() {
                    existing.polarity = signal.polarity;
                }
                existing
                    .supporting_segments
                    .extend(signal.supporting_segments);
                existing.supporting_segments.sort_unstable();
                existing.supporting_segments.dedup();
            }
            None => merged.push((normalized, signal)),
        }
    }

    let mut ranked: Vec<RankedSignal> = merged.into_iter().map(|(_, s)| s).collect();
    ranked.sort_by(compare_ranked);
    ranked.truncate(n);
    ranked
}

fn compare_ranked(a: &RankedSignal, b: &RankedSignal) -> Ordering {
    b.importance
        .total_cmp(&a.importance)
        .then_with(|| a.earliest_segment().cmp(&b.earliest_segment()))
        .then_with(|| a.text.cmp(&b.text))
}

/// Count failed segments by failure kind.
pub fn failure_breakdown(partials: &[PartialResult]) -> BTreeMap<FailureKind, usize> {
    let mut breakdown = BTreeMap::new();
    for failure in partials.iter().filter_map(PartialResult::failure) {
        *breakdown.entry(failure.kind).or_default() += 1;
    }
    breakdown
}

/// Mean confidence across results.
pub fn average_confidence(results: &[&SynthesizedResult]) -> Option<f64> {
    mean(results.iter().map(|r| r.confidence))
}

/// Mean rate-change probability across the results that reported one.
pub fn average_rate_change_probability(results: &[&SynthesizedResult]) -> Option<f64> {
    mean(results.iter().filter_map(|r| r.rate_change_probability))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Which way the analyzed sources lean as a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallBias {
    Hawkish,
    Dovish,
    Hold,
    Mixed,
}

impl OverallBias {
    pub fn emoji(&self) -> &'static str {
        match self {
            OverallBias::Hawkish => "⚠️",
            OverallBias::Dovish => "📉",
            OverallBias::Hold => "⏸️",
            OverallBias::Mixed => "⚖️",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            OverallBias::Hawkish => "Rate increases more likely",
            OverallBias::Dovish => "Rate cuts more likely",
            OverallBias::Hold => "Rates likely to remain stable",
            OverallBias::Mixed => "No clear consensus",
        }
    }
}

impl fmt::Display for OverallBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallBias::Hawkish => write!(f, "HAWKISH BIAS"),
            OverallBias::Dovish => write!(f, "DOVISH BIAS"),
            OverallBias::Hold => write!(f, "HOLD STANCE"),
            OverallBias::Mixed => write!(f, "MIXED SIGNALS"),
        }
    }
}

/// A stance wins only with a strict plurality over the other two camps.
/// Neutral results never decide the bias.
pub fn overall_bias(summary: &AggregateSummary) -> OverallBias {
    let (hawk, dove, hold) = (summary.hawkish, summary.dovish, summary.hold);
    if hawk > dove && hawk > hold {
        OverallBias::Hawkish
    } else if dove > hawk && dove > hold {
        OverallBias::Dovish
    } else if hold > hawk && hold > dove {
        OverallBias::Hold
    } else {
        OverallBias::Mixed
    }
}

/// Likelihood band of a rate change within three months.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateOutlook {
    High,
    Moderate,
    Low,
}

impl RateOutlook {
    pub fn emoji(&self) -> &'static str {
        match self {
            RateOutlook::High => "⚠️",
            RateOutlook::Moderate => "⚡",
            RateOutlook::Low => "✅",
        }
    }

    pub fn headline(&self) -> &'static str {
        match self {
            RateOutlook::High => "HIGH probability of rate change in next 3 months",
            RateOutlook::Moderate => "MODERATE probability of rate change",
            RateOutlook::Low => "LOW probability of rate change",
        }
    }

    pub fn advice(&self) -> &'static [&'static str] {
        match self {
            RateOutlook::High => &[
                "Monitor central bank announcements closely",
                "Consider locking in rates if borrowing soon",
            ],
            RateOutlook::Moderate => &[
                "Stay informed of economic indicators",
                "Review mortgage renewal options",
            ],
            RateOutlook::Low => &[
                "Stable rate environment expected",
                "Variable rate products may be attractive",
            ],
        }
    }
}

/// Band a probability in [0, 1]: above 0.6 is high, above 0.3 moderate.
pub fn rate_outlook(probability: f64) -> RateOutlook {
    if probability > 0.6 {
        RateOutlook::High
    } else if probability > 0.3 {
        RateOutlook::Moderate
    } else {
        RateOutlook::Low
    }
}
