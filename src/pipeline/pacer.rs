//! Rate pacing for outbound capability calls.
//!
//! The pacer caps how many calls are in flight and enforces a minimum gap
//! between the starts of consecutive calls. Callers are served in the order
//! they asked: the start-time lock and the slot semaphore are both FIFO.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::trace;

/// The pacer was closed and hands out no more slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("pacer is closed")]
pub struct PacerClosed;

/// Shared gate in front of the analysis capability.
#[derive(Debug)]
pub struct Pacer {
    slots: Arc<Semaphore>,
    /// Earliest instant the next call may start.
    next_start: Mutex<Option<Instant>>,
    min_spacing: Duration,
    max_concurrent: usize,
}

/// One granted call slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct PacerPermit {
    _slot: OwnedSemaphorePermit,
}

impl PacerPermit {
    /// Give the slot back. Same as dropping the permit.
    pub fn release(self) {}
}

impl Pacer {
    pub fn new(max_concurrent: usize, min_spacing: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            next_start: Mutex::new(None),
            min_spacing,
            max_concurrent,
        }
    }

    /// Wait for a call slot and for the spacing window to open.
    ///
    /// Cancel-safe: a caller dropped while waiting holds nothing.
    pub async fn acquire(&self) -> Result<PacerPermit, PacerClosed> {
        // Holding the lock while waiting for a slot keeps grants in arrival order.
        let mut next_start = self.next_start.lock().await;
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PacerClosed)?;

        let now = Instant::now();
        let start = match *next_start {
            Some(earliest) if earliest > now => earliest,
            _ => now,
        };
        *next_start = Some(start + self.min_spacing);
        drop(next_start);

        if start > now {
            trace!("Pacer delaying call start by {:?}", start - now);
            tokio::time::sleep_until(start).await;
        }

        Ok(PacerPermit { _slot: slot })
    }

    /// Refuse all further acquisitions. Waiting callers get [`PacerClosed`].
    pub fn close(&self) {
        self.slots.close();
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.available()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }
}
