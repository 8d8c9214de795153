//! In-process bus delivery metrics.
//!
//! Plain atomic counters with a point-in-time snapshot; no exporter is wired
//! here, callers log or poll the snapshot as needed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Counters updated by the bus hot path and maintenance loops
#[derive(Debug)]
pub struct BusMetrics {
    started_at: Instant,
    /// Envelopes accepted by `send` (including failed attempts)
    pub messages_sent: AtomicU64,
    /// Sends that reached every resolved recipient
    pub messages_delivered: AtomicU64,
    /// Sends short-circuited because the message id was already delivered
    pub duplicate_sends: AtomicU64,
    /// Sends that resolved no recipients
    pub routing_failures: AtomicU64,
    /// Sends that reached some but not all recipients
    pub partial_deliveries: AtomicU64,
    /// Retry attempts performed by the retry loop
    pub retries_attempted: AtomicU64,
    /// Envelopes dropped after exhausting their retry budget
    pub retry_exhausted: AtomicU64,
    /// Envelopes discarded because they expired before delivery
    pub expired_dropped: AtomicU64,
    /// Handler invocations that returned an error
    pub handler_errors: AtomicU64,
}

impl Default for BusMetrics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            messages_sent: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            duplicate_sends: AtomicU64::new(0),
            routing_failures: AtomicU64::new(0),
            partial_deliveries: AtomicU64::new(0),
            retries_attempted: AtomicU64::new(0),
            retry_exhausted: AtomicU64::new(0),
            expired_dropped: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
        }
    }
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_routing_failure(&self) {
        self.routing_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partial_delivery(&self) {
        self.partial_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_attempt(&self) {
        self.retries_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_exhausted(&self) {
        self.retry_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self) {
        self.expired_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of all counters
    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            uptime: self.started_at.elapsed(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            duplicate_sends: self.duplicate_sends.load(Ordering::Relaxed),
            routing_failures: self.routing_failures.load(Ordering::Relaxed),
            partial_deliveries: self.partial_deliveries.load(Ordering::Relaxed),
            retries_attempted: self.retries_attempted.load(Ordering::Relaxed),
            retry_exhausted: self.retry_exhausted.load(Ordering::Relaxed),
            expired_dropped: self.expired_dropped.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of [`BusMetrics`]
#[derive(Debug, Clone, Serialize)]
pub struct BusMetricsSnapshot {
    #[serde(skip)]
    pub uptime: Duration,
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub duplicate_sends: u64,
    pub routing_failures: u64,
    pub partial_deliveries: u64,
    pub retries_attempted: u64,
    pub retry_exhausted: u64,
    pub expired_dropped: u64,
    pub handler_errors: u64,
}

impl BusMetricsSnapshot {
    /// Fully delivered sends over all sends
    pub fn delivery_rate(&self) -> f64 {
        if self.messages_sent == 0 {
            0.0
        } else {
            self.messages_delivered as f64 / self.messages_sent as f64
        }
    }
}

impl fmt::Display for BusMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BusMetrics {{ delivered: {}/{} ({:.0}%), retries: {}, exhausted: {}, expired: {}, handler_errors: {}, uptime: {}s }}",
            self.messages_delivered,
            self.messages_sent,
            self.delivery_rate() * 100.0,
            self.retries_attempted,
            self.retry_exhausted,
            self.expired_dropped,
            self.handler_errors,
            self.uptime.as_secs(),
        )
    }
}
