//! End-to-end pipeline runs against the scripted capability.

use ratewatch::capability::scripted::{json_reply, ScriptedCapability};
use ratewatch::error::{CapabilityError, PipelineError};
use ratewatch::models::{Document, FailureKind, PartialResult, Stance};
use ratewatch::pipeline::{Pacer, Pipeline, PipelineSettings, RunObserver, RunState};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn segment_findings(signal: &str) -> Value {
    json!({
        "key_signals": [{"text": signal, "polarity": "HAWKISH", "strength": 0.7}],
        "inflation_concern": "HIGH",
        "growth_outlook": "MODERATE",
        "summary": "Inflation remains elevated."
    })
}

fn synthesis_reply(confidence: f64) -> Value {
    json!({
        "stance": "HAWKISH",
        "confidence": confidence,
        "rate_change_probability": 0.65,
        "direction": "UP",
        "key_signals": [
            {"signal": "Inflation remains sticky", "importance": 0.9, "segments": [0]}
        ],
        "inflation_concern": "HIGH",
        "growth_outlook": "MODERATE",
        "summary": "The committee signals further tightening."
    })
}

fn rejected() -> Result<ratewatch::capability::AnalysisResponse, CapabilityError> {
    Err(CapabilityError::Rejected {
        status: 400,
        message: "bad request".to_string(),
    })
}

/// Segments of at most 100 chars sharing 10, with no call spacing.
fn small_settings() -> PipelineSettings {
    PipelineSettings {
        max_segment_size: 100,
        overlap_size: 10,
        min_call_spacing: Duration::ZERO,
        ..PipelineSettings::default()
    }
}

/// 460 chars split into five segments under `small_settings`.
fn five_segment_document() -> Document {
    Document::new("y".repeat(460), "Press Release")
}

fn healthy_capability() -> ScriptedCapability {
    ScriptedCapability::new()
        .with_segment_fallback(json_reply(segment_findings("Inflation remains sticky")))
        .with_synthesis_fallback(json_reply(synthesis_reply(0.8)))
}

#[derive(Default)]
struct CompletionOrder(Mutex<Vec<usize>>);

impl RunObserver for CompletionOrder {
    fn segment_finished(&self, result: &PartialResult) {
        if let Ok(mut order) = self.0.lock() {
            order.push(result.segment_index);
        }
    }
}

fn indices(partials: &[PartialResult]) -> Vec<usize> {
    partials.iter().map(|p| p.segment_index).collect()
}

#[tokio::test(start_paused = true)]
async fn test_long_document_runs_three_segments() {
    let capability = Arc::new(healthy_capability());
    let pipeline = Pipeline::new(capability.clone(), PipelineSettings::default()).unwrap();

    let document = Document::new("x".repeat(120_000), "Monetary Policy Report");
    let outcome = pipeline
        .run(&document, &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.chunked);
    assert_eq!(outcome.segment_count, 3);
    assert_eq!(indices(&outcome.partials), vec![0, 1, 2]);
    assert_eq!(capability.segment_calls().await, 3);
    assert_eq!(capability.synthesis_calls().await, 1);

    let mut lengths: Vec<usize> = capability
        .requests()
        .await
        .iter()
        .filter(|r| r.framing_context.contains("THIS SECTION ONLY"))
        .map(|r| r.text.chars().count())
        .collect();
    lengths.sort_unstable();
    assert_eq!(lengths, vec![22_000, 50_000, 50_000]);

    let result = &outcome.result;
    assert_eq!(result.stance, Stance::Hawkish);
    assert!(result.coverage.is_complete());
    assert!(!result.degraded);
    assert!((result.confidence - 0.8).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_short_document_still_synthesizes() {
    let capability = Arc::new(healthy_capability());
    let pipeline = Pipeline::new(capability.clone(), PipelineSettings::default()).unwrap();

    let document = Document::new("s".repeat(10_000), "Speech");
    let outcome = pipeline
        .run(&document, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.chunked);
    assert_eq!(outcome.segment_count, 1);
    assert_eq!(capability.segment_calls().await, 1);
    assert_eq!(capability.synthesis_calls().await, 1);

    let requests = capability.requests().await;
    assert!(requests[0].framing_context.contains("PART 1 of 1"));
    assert_eq!(requests[0].text.len(), 10_000);
}

#[tokio::test(start_paused = true)]
async fn test_all_segments_failing_skips_synthesis() {
    let capability = Arc::new(
        ScriptedCapability::new()
            .with_segment_fallback(Err(CapabilityError::Unavailable("down".to_string())))
            .with_synthesis_fallback(json_reply(synthesis_reply(0.8))),
    );
    let pipeline = Pipeline::new(capability.clone(), small_settings()).unwrap();

    let failure = pipeline
        .run(&Document::new("z".repeat(250), "Minutes"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.error, PipelineError::AllSegmentsFailed { total: 3 });
    assert_eq!(failure.coverage.total, 3);
    assert_eq!(failure.coverage.succeeded, 0);
    assert_eq!(failure.partials.len(), 3);
    // Two attempts per segment, no reduce call.
    assert_eq!(capability.segment_calls().await, 6);
    assert_eq!(capability.synthesis_calls().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_segment_lowers_confidence() {
    let healthy = Arc::new(healthy_capability());
    let full = Pipeline::new(healthy, small_settings())
        .unwrap()
        .run(&five_segment_document(), &CancellationToken::new())
        .await
        .unwrap();

    let flaky = Arc::new(healthy_capability().script_segment(2, rejected()));
    let partial = Pipeline::new(flaky.clone(), small_settings())
        .unwrap()
        .run(&five_segment_document(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(full.result.coverage.succeeded, 5);
    assert_eq!(partial.result.coverage.succeeded, 4);
    assert!(partial.result.confidence < full.result.confidence);
    assert!(!partial.result.degraded);

    // Rejected requests are not retried.
    let failed = &partial.partials[2];
    assert!(!failed.is_success());
    assert_eq!(failed.attempts, 1);
    assert_eq!(flaky.segment_calls().await, 5);
}

#[tokio::test(start_paused = true)]
async fn test_majority_failure_marks_result_degraded() {
    let capability = Arc::new(
        healthy_capability()
            .script_segment(0, rejected())
            .script_segment(1, rejected())
            .script_segment(2, rejected()),
    );
    let outcome = Pipeline::new(capability, small_settings())
        .unwrap()
        .run(&five_segment_document(), &CancellationToken::new())
        .await
        .unwrap();

    let result = &outcome.result;
    assert!(result.degraded);
    assert!(result.confidence <= 0.5);
    assert_eq!(result.coverage.failed, 3);
    // The only reply signal cites a failed segment and matches signals from
    // segments 3 and 4 by text.
    assert_eq!(result.top_signals.len(), 1);
    assert_eq!(result.top_signals[0].supporting_segments, vec![3, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_partials_ordered_by_index_not_completion() {
    let capability = Arc::new(
        healthy_capability().with_segment_delay(0, Duration::from_secs(5)),
    );
    let order = Arc::new(CompletionOrder::default());
    let settings = PipelineSettings {
        max_concurrent_calls: 3,
        ..small_settings()
    };
    let pipeline = Pipeline::new(capability, settings)
        .unwrap()
        .with_observer(order.clone());

    let outcome = pipeline
        .run(&Document::new("o".repeat(250), "Minutes"), &CancellationToken::new())
        .await
        .unwrap();

    let completed = order.0.lock().unwrap().clone();
    assert_eq!(completed.last(), Some(&0));
    assert_eq!(indices(&outcome.partials), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_hung_segment_times_out_without_blocking_siblings() {
    let capability = Arc::new(
        healthy_capability().with_segment_delay(0, Duration::from_secs(3600)),
    );
    let settings = PipelineSettings {
        max_concurrent_calls: 3,
        call_timeout: Duration::from_secs(5),
        ..small_settings()
    };
    let pipeline = Pipeline::new(capability.clone(), settings).unwrap();

    let started = tokio::time::Instant::now();
    let outcome = pipeline
        .run(&Document::new("w".repeat(250), "Minutes"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(60));

    let hung = &outcome.partials[0];
    assert_eq!(hung.failure().map(|f| f.kind), Some(FailureKind::Timeout));
    assert_eq!(hung.attempts, 2);
    assert!(outcome.partials[1].is_success());
    assert!(outcome.partials[2].is_success());

    let result = &outcome.result;
    assert_eq!(result.coverage.succeeded, 2);
    assert!(!result.degraded);
    assert!(result.confidence < result.raw_confidence);
    assert!((result.confidence - 0.8 * 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(pipeline.pacer().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_map_stage() {
    let capability = Arc::new(
        healthy_capability()
            .with_segment_delay(1, Duration::from_secs(60))
            .with_segment_delay(2, Duration::from_secs(60)),
    );
    let settings = PipelineSettings {
        max_concurrent_calls: 3,
        ..small_settings()
    };
    let pipeline = Pipeline::new(capability.clone(), settings).unwrap();
    let document = Document::new("c".repeat(250), "Minutes");
    let cancel = CancellationToken::new();

    let (result, _) = tokio::join!(pipeline.run(&document, &cancel), async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();
    });

    let failure = result.unwrap_err();
    assert_eq!(failure.error, PipelineError::Cancelled);
    assert_eq!(failure.state, RunState::Analyzing);
    assert_eq!(failure.coverage.total, 3);
    assert_eq!(indices(&failure.partials), vec![0]);

    // Abandoned calls hand their slots back.
    assert_eq!(pipeline.pacer().in_flight(), 0);
    assert_eq!(pipeline.pacer().available(), 3);
    assert_eq!(capability.synthesis_calls().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_cap_respected() {
    let mut capability = healthy_capability();
    for index in 0..6 {
        capability = capability.with_segment_delay(index, Duration::from_secs(1));
    }
    let capability = Arc::new(capability);

    let outcome = Pipeline::new(capability.clone(), small_settings())
        .unwrap()
        .run(&Document::new("k".repeat(540), "Minutes"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.segment_count, 6);
    assert_eq!(capability.peak_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shared_pacer_limits_all_pipelines() {
    let capability = Arc::new(
        healthy_capability()
            .with_segment_delay(0, Duration::from_secs(1))
            .with_segment_delay(1, Duration::from_secs(1)),
    );
    let pacer = Arc::new(Pacer::new(1, Duration::ZERO));

    let first = Pipeline::new(capability.clone(), small_settings())
        .unwrap()
        .with_pacer(pacer.clone());
    let second = Pipeline::new(capability.clone(), small_settings())
        .unwrap()
        .with_pacer(pacer.clone());

    let cancel = CancellationToken::new();
    let speech = Document::new("a".repeat(150), "Speech");
    let minutes = Document::new("b".repeat(150), "Minutes");
    let (a, b) = tokio::join!(first.run(&speech, &cancel), second.run(&minutes, &cancel));

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(capability.peak_in_flight(), 1);
    assert_eq!(capability.segment_calls().await, 4);
    assert_eq!(capability.synthesis_calls().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unusable_reply_is_retried() {
    let capability = Arc::new(
        healthy_capability()
            .script_segment(1, Ok(ratewatch::capability::AnalysisResponse::Text(
                "I think the stance is hawkish.".to_string(),
            ))),
    );
    let outcome = Pipeline::new(capability.clone(), small_settings())
        .unwrap()
        .run(&Document::new("r".repeat(150), "Speech"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.partials[1].is_success());
    assert_eq!(outcome.partials[1].attempts, 2);
    assert_eq!(outcome.partials[0].attempts, 1);

    let retries: Vec<_> = capability
        .requests()
        .await
        .into_iter()
        .filter(|r| r.framing_context.contains("previous reply could not be used"))
        .collect();
    assert_eq!(retries.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_failure_keeps_partials() {
    let capability = Arc::new(
        ScriptedCapability::new()
            .with_segment_fallback(json_reply(segment_findings("Wage growth strong")))
            .with_synthesis_fallback(Err(CapabilityError::Timeout(Duration::from_secs(120)))),
    );
    let failure = Pipeline::new(capability.clone(), small_settings())
        .unwrap()
        .run(&Document::new("t".repeat(250), "Minutes"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        PipelineError::SynthesisFailed { attempts: 2, .. }
    ));
    assert_eq!(failure.state, RunState::Synthesizing);
    assert_eq!(failure.coverage.succeeded, 3);
    assert_eq!(failure.partials.len(), 3);
    assert_eq!(capability.synthesis_calls().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_top_signals_are_capped_and_ranked() {
    let signals: Vec<Value> = (0..8)
        .map(|i| {
            json!({
                "signal": format!("Signal number {}", i),
                "importance": 0.1 * i as f64,
                "segments": [0]
            })
        })
        .collect();
    let reply = json!({
        "stance": "HOLD",
        "confidence": 0.7,
        "key_signals": signals,
        "inflation_concern": "MEDIUM",
        "growth_outlook": "MODERATE",
        "summary": "Policy on hold."
    });
    let capability = Arc::new(
        ScriptedCapability::new()
            .with_segment_fallback(json_reply(segment_findings("Policy on hold")))
            .with_synthesis_fallback(json_reply(reply)),
    );

    let outcome = Pipeline::new(capability, small_settings())
        .unwrap()
        .run(&Document::new("h".repeat(80), "Statement"), &CancellationToken::new())
        .await
        .unwrap();

    let top = &outcome.result.top_signals;
    assert_eq!(top.len(), 5);
    assert_eq!(top[0].text, "Signal number 7");
    assert!(top.windows(2).all(|w| w[0].importance >= w[1].importance));
    assert_eq!(outcome.result.stance, Stance::Hold);
    assert_eq!(outcome.result.rate_change_probability, None);
}
