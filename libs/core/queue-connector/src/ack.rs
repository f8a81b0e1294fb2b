//! Batched client acknowledgment.
//!
//! Every received message bumps a shared counter before it is processed.
//! After processing, the listener asks the batcher to flush: once the
//! counter reaches the threshold, one acknowledgment is sent for the current
//! message (which, in client mode, covers everything its consumer received
//! before it) and the counter drops by the amount that was covered.
//!
//! Check-then-flush is allowed to race across consumers. Two consumers may
//! both see the threshold crossed and both acknowledge; the second
//! acknowledgment covers an already acknowledged range. The counter never
//! goes below zero.

use crate::broker::Message;
use crate::error::ConnectorError;
use crate::metrics::ConnectorMetrics;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info};

/// Default number of received messages per acknowledgment.
pub const DEFAULT_ACK_THRESHOLD: u64 = 2000;

/// Result of a flush check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Threshold not reached
    NotDue,
    /// Acknowledgment sent, covering this many counted messages
    Flushed(u64),
    /// Acknowledgment failed; the counter is kept so the next message retries
    Failed,
}

/// Shared counter of unacknowledged messages.
#[derive(Debug)]
pub struct AckBatcher {
    unacknowledged: AtomicU64,
    flushes: AtomicU64,
    failures: AtomicU64,
    threshold: u64,
    metrics: Option<ConnectorMetrics>,
}

impl AckBatcher {
    /// Create a batcher flushing every `threshold` messages (minimum 1).
    pub fn new(threshold: u64) -> Self {
        Self {
            unacknowledged: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            threshold: threshold.max(1),
            metrics: None,
        }
    }

    /// Record flushes and failures on these metrics.
    pub fn with_metrics(mut self, metrics: ConnectorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Count one received message. Returns the updated count.
    pub fn record_receipt(&self) -> u64 {
        self.unacknowledged.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Acknowledge through `message` if the threshold has been reached.
    ///
    /// Failures are logged and leave the counter untouched; they never
    /// propagate to the caller.
    pub async fn flush_if_due(&self, message: &dyn Message) -> FlushOutcome {
        let observed = self.unacknowledged.load(Ordering::Acquire);
        if observed < self.threshold {
            return FlushOutcome::NotDue;
        }

        match message.acknowledge().await {
            Ok(()) => {
                self.settle(observed);
                self.flushes.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.ack_flushed(observed);
                }
                info!(
                    unacknowledged = observed,
                    message_id = %message.message_id(),
                    "Acknowledgement sent"
                );
                FlushOutcome::Flushed(observed)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.ack_failed();
                }
                let err = ConnectorError::Acknowledgment(e);
                error!(
                    error = %err,
                    unacknowledged = observed,
                    message_id = %message.message_id(),
                    "Failed to send acknowledgement"
                );
                FlushOutcome::Failed
            }
        }
    }

    /// Snapshot of the counter, for health reporting.
    pub fn pending(&self) -> u64 {
        self.unacknowledged.load(Ordering::Acquire)
    }

    /// Number of successful flushes so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Number of rejected acknowledgments so far.
    pub fn failed_flush_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Take `covered` messages off the counter, saturating at zero so racing
    /// flushes cannot underflow it.
    fn settle(&self, covered: u64) {
        let _ = self
            .unacknowledged
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(covered))
            });
    }
}

impl Default for AckBatcher {
    fn default() -> Self {
        Self::new(DEFAULT_ACK_THRESHOLD)
    }
}
