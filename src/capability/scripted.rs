//! Scripted in-memory capability.
//!
//! Replays canned replies per segment and for synthesis, records every
//! request, and tracks how many calls were in flight at once. Used by the
//! pipeline tests in place of a live model.

use super::{AnalysisCapability, AnalysisRequest, AnalysisResponse, AnalysisTask};
use crate::error::CapabilityError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// One canned reply.
pub type ScriptedReply = Result<AnalysisResponse, CapabilityError>;

/// Wrap a JSON value as a raw-text reply, the way HTTP backends return it.
pub fn json_reply(value: serde_json::Value) -> ScriptedReply {
    Ok(AnalysisResponse::Text(value.to_string()))
}

#[derive(Default)]
pub struct ScriptedCapability {
    segment_queues: Mutex<HashMap<usize, VecDeque<ScriptedReply>>>,
    segment_fallback: Option<ScriptedReply>,
    synthesis_queue: Mutex<VecDeque<ScriptedReply>>,
    synthesis_fallback: Option<ScriptedReply>,
    segment_delays: HashMap<usize, Duration>,
    requests: Mutex<Vec<AnalysisRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply used for any segment without a queued reply.
    pub fn with_segment_fallback(mut self, reply: ScriptedReply) -> Self {
        self.segment_fallback = Some(reply);
        self
    }

    /// Queue a reply for one segment; queued replies are consumed in order.
    pub fn script_segment(mut self, index: usize, reply: ScriptedReply) -> Self {
        self.segment_queues
            .get_mut()
            .entry(index)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn with_synthesis_fallback(mut self, reply: ScriptedReply) -> Self {
        self.synthesis_fallback = Some(reply);
        self
    }

    pub fn script_synthesis(mut self, reply: ScriptedReply) -> Self {
        self.synthesis_queue.get_mut().push_back(reply);
        self
    }

    /// Delay the reply for one segment, to force out-of-order completion.
    pub fn with_segment_delay(mut self, index: usize, delay: Duration) -> Self {
        self.segment_delays.insert(index, delay);
        self
    }

    /// Every request received so far, in arrival order.
    pub async fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn segment_calls(&self) -> usize {
        self.count_calls(|task| matches!(task, AnalysisTask::Segment { .. }))
            .await
    }

    pub async fn synthesis_calls(&self) -> usize {
        self.count_calls(|task| matches!(task, AnalysisTask::Synthesis { .. }))
            .await
    }

    /// Highest number of concurrent `invoke` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn count_calls(&self, predicate: impl Fn(&AnalysisTask) -> bool) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| predicate(&r.task))
            .count()
    }

    async fn next_reply(&self, task: AnalysisTask) -> ScriptedReply {
        let queued = match task {
            AnalysisTask::Segment { index, .. } => self
                .segment_queues
                .lock()
                .await
                .get_mut(&index)
                .and_then(VecDeque::pop_front),
            AnalysisTask::Synthesis { .. } => self.synthesis_queue.lock().await.pop_front(),
        };

        let fallback = match task {
            AnalysisTask::Segment { .. } => &self.segment_fallback,
            AnalysisTask::Synthesis { .. } => &self.synthesis_fallback,
        };

        queued.or_else(|| fallback.clone()).unwrap_or_else(|| {
            Err(CapabilityError::Unavailable(
                "no scripted reply for request".to_string(),
            ))
        })
    }
}

/// Keeps the in-flight counter honest when a call is abandoned mid-flight.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AnalysisCapability for ScriptedCapability {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, CapabilityError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        self.requests.lock().await.push(request.clone());

        if let AnalysisTask::Segment { index, .. } = request.task {
            if let Some(delay) = self.segment_delays.get(&index) {
                tokio::time::sleep(*delay).await;
            }
        }

        self.next_reply(request.task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment_request(index: usize) -> AnalysisRequest {
        AnalysisRequest {
            text: "text".into(),
            framing_context: "frame".into(),
            task: AnalysisTask::Segment { index, total: 3 },
        }
    }

    #[tokio::test]
    async fn test_queue_then_fallback() {
        let capability = ScriptedCapability::new()
            .script_segment(1, Err(CapabilityError::Timeout(Duration::from_secs(1))))
            .with_segment_fallback(json_reply(serde_json::json!({"ok": true})));

        assert!(capability.invoke(&segment_request(1)).await.is_err());
        assert!(capability.invoke(&segment_request(1)).await.is_ok());
        assert!(capability.invoke(&segment_request(0)).await.is_ok());
        assert_eq!(capability.segment_calls().await, 3);
        assert_eq!(capability.synthesis_calls().await, 0);
    }

    #[tokio::test]
    async fn test_unscripted_request_is_unavailable() {
        let capability = ScriptedCapability::new();
        let err = capability.invoke(&segment_request(0)).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Unavailable(_)));
        assert_eq!(capability.peak_in_flight(), 1);
    }
}
