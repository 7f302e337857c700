//! Listener counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters updated by the dispatch loop.
#[derive(Debug)]
pub struct ListenerMetrics {
    /// Notifications received from the subscription.
    pub notifications_received: AtomicU64,
    /// Messages decoded and handed to the dispatcher.
    pub messages_dispatched: AtomicU64,
    /// Notifications skipped because they could not be decoded.
    pub decode_errors: AtomicU64,
    /// Per-message consumer failures.
    pub consumer_errors: AtomicU64,
    /// Creation time.
    pub created_at: Instant,
}

impl ListenerMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self {
            notifications_received: AtomicU64::new(0),
            messages_dispatched: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            consumer_errors: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn record_notification(&self) {
        self.notifications_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self, consumer_failures: usize) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
        self.consumer_errors
            .fetch_add(consumer_failures as u64, Ordering::Relaxed);
    }

    /// Time since the metrics were created.
    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Get notifications received count.
    pub fn received(&self) -> u64 {
        self.notifications_received.load(Ordering::Relaxed)
    }

    /// Get dispatched messages count.
    pub fn dispatched(&self) -> u64 {
        self.messages_dispatched.load(Ordering::Relaxed)
    }

    /// Get decode error count.
    pub fn decode_failures(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Get consumer error count.
    pub fn consumer_failures(&self) -> u64 {
        self.consumer_errors.load(Ordering::Relaxed)
    }
}

impl Default for ListenerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
