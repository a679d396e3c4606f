//! Pipeline counters.
//!
//! `PipelineMetrics` is shared between the pipeline consumer and whoever
//! reports on it. All counters are relaxed atomics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by the pipeline consumer loop.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Raw payloads taken off the channel.
    pub received_total: AtomicU64,

    /// Events successfully published.
    pub published_total: AtomicU64,

    /// Payloads dropped as malformed.
    pub dropped_total: AtomicU64,
}

impl PipelineMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a payload taken off the channel.
    pub fn record_received(&self) {
        self.received_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a published event.
    pub fn record_published(&self) {
        self.published_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dropped malformed payload.
    pub fn record_dropped(&self) {
        self.dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            received_total: self.received_total.load(Ordering::Relaxed),
            published_total: self.published_total.load(Ordering::Relaxed),
            dropped_total: self.dropped_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineMetricsSnapshot {
    /// Raw payloads received.
    pub received_total: u64,

    /// Events published.
    pub published_total: u64,

    /// Payloads dropped as malformed.
    pub dropped_total: u64,
}
