//! Paced, timed and retried capability calls shared by both stages.

use super::Pacer;
use crate::capability::{AnalysisCapability, AnalysisRequest, AnalysisResponse};
use crate::error::{CapabilityError, ResponseParseError, SegmentAnalysisError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Appended to the framing of every attempt after the first.
pub(crate) const RETRY_SUFFIX: &str = "\n\nIMPORTANT: Your previous reply could not be used. \
Return ONLY one JSON object that matches the schema above exactly, with every field present \
and every enum value spelled exactly as listed.";

/// How many times a request is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never less than one.
    pub attempts: u32,
    pub pause: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, pause: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            pause,
        }
    }
}

/// Result of a retried request and the attempts it took.
#[derive(Debug)]
pub(crate) struct Attempted<T> {
    pub outcome: Result<T, SegmentAnalysisError>,
    pub attempts: u32,
}

/// Sends requests to the capability through the shared pacer.
pub(crate) struct Dispatcher {
    capability: Arc<dyn AnalysisCapability>,
    pacer: Arc<Pacer>,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        capability: Arc<dyn AnalysisCapability>,
        pacer: Arc<Pacer>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            capability,
            pacer,
            call_timeout,
        }
    }

    /// One paced call under the per-call timeout. The slot is held only for
    /// the duration of the call.
    pub async fn call(
        &self,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse, CapabilityError> {
        let permit = self
            .pacer
            .acquire()
            .await
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;

        let call = self.capability.invoke(request);
        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout(self.call_timeout)),
        };

        permit.release();
        result
    }

    /// Call and parse until a reply is usable, the error is terminal, or the
    /// attempts run out. `build` receives the framing suffix for the attempt.
    pub async fn call_with_retry<T, B, P>(
        &self,
        policy: RetryPolicy,
        what: &str,
        build: B,
        parse: P,
    ) -> Attempted<T>
    where
        B: Fn(&str) -> AnalysisRequest,
        P: Fn(&AnalysisResponse) -> Result<T, ResponseParseError>,
    {
        let mut attempt = 1;
        loop {
            let suffix = if attempt == 1 { "" } else { RETRY_SUFFIX };
            let request = build(suffix);

            let outcome = match self.call(&request).await {
                Ok(response) => parse(&response).map_err(SegmentAnalysisError::from),
                Err(e) => Err(SegmentAnalysisError::from(e)),
            };

            match outcome {
                Ok(value) => {
                    debug!("{} succeeded on attempt {}", what, attempt);
                    return Attempted {
                        outcome: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(e) if e.is_retryable() && attempt < policy.attempts => {
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying...",
                        what, attempt, policy.attempts, e
                    );
                    tokio::time::sleep(policy.pause).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("{} failed after {} attempt(s): {}", what, attempt, e);
                    return Attempted {
                        outcome: Err(e),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}
