//! Bounded FIFO queue for envelopes addressed to one destination.
//!
//! Overflow policy: drop-oldest. When the queue is at capacity the oldest
//! entry is evicted to make room for the new one, so a slow consumer degrades
//! gracefully instead of stalling producers. A zero-capacity queue rejects
//! every put, which models a destination that cannot accept traffic.
//! The queue is never cleared behind the consumer's back by maintenance
//! loops; the capacity bound here is the single backpressure mechanism.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::warn;

use types::Envelope;

/// Bounded, ordered holding area for one destination
#[derive(Debug)]
pub struct DestinationQueue {
    entries: Mutex<VecDeque<Envelope>>,
    capacity: usize,
}

impl DestinationQueue {
    /// Create a queue bounded at `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Append an envelope, evicting the oldest entry at capacity.
    ///
    /// Returns `false` only when the queue cannot accept the envelope at all
    /// (zero capacity).
    pub fn put(&self, envelope: Envelope) -> bool {
        if self.capacity == 0 {
            warn!(
                destination = %envelope.destination,
                message_id = %envelope.message.id,
                "queue has zero capacity, rejecting envelope"
            );
            return false;
        }

        let mut entries = self.entries.lock().expect("queue mutex poisoned");
        if entries.len() >= self.capacity {
            if let Some(evicted) = entries.pop_front() {
                warn!(
                    destination = %envelope.destination,
                    evicted_id = %evicted.message.id,
                    capacity = self.capacity,
                    "queue at capacity, dropping oldest envelope"
                );
            }
        }
        entries.push_back(envelope);
        true
    }

    /// Remove and return the oldest envelope (FIFO)
    pub fn get(&self) -> Option<Envelope> {
        self.entries.lock().expect("queue mutex poisoned").pop_front()
    }

    /// Current number of queued envelopes
    pub fn len(&self) -> usize {
        self.entries.lock().expect("queue mutex poisoned").len()
    }

    /// True when no envelopes are queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all queued envelopes, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().expect("queue mutex poisoned");
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    /// Configured capacity bound
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
