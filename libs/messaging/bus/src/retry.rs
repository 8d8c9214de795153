//! Failed-envelope list consulted by the bus retry loop.
//!
//! Entries stay in the list while `retry_count < max_retries`; they leave
//! either by a successful re-send or by budget exhaustion, never both paths
//! at once.

use std::sync::Mutex;

use tracing::debug;

use types::Envelope;

/// Envelopes awaiting another delivery attempt
#[derive(Debug, Default)]
pub struct RetryQueue {
    entries: Mutex<Vec<Envelope>>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a failed envelope if it still has retry budget.
    ///
    /// Returns `true` when the envelope was queued for retry, `false` when
    /// the budget is already exhausted and the envelope is dropped.
    pub fn push(&self, envelope: Envelope) -> bool {
        if !envelope.should_retry() {
            debug!(
                message_id = %envelope.message.id,
                retry_count = envelope.retry_count,
                max_retries = envelope.max_retries,
                "retry budget exhausted, dropping envelope"
            );
            return false;
        }
        self.entries
            .lock()
            .expect("retry queue mutex poisoned")
            .push(envelope);
        true
    }

    /// Drain every pending entry for a retry cycle
    pub fn take_all(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.entries.lock().expect("retry queue mutex poisoned"))
    }

    /// Number of envelopes awaiting retry
    pub fn len(&self) -> usize {
        self.entries.lock().expect("retry queue mutex poisoned").len()
    }

    /// True when nothing is awaiting retry
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use types::{Message, MessageKind, ProtocolKind, TransportKind};

    fn envelope_with_budget(retry_count: u32, max_retries: u32) -> Envelope {
        let message = Message::new(MessageKind::Request, "alpha", "beta", Map::new());
        let mut envelope = Envelope::new(
            ProtocolKind::Agent,
            TransportKind::InProcess,
            "beta",
            "alpha",
            message,
        )
        .with_max_retries(max_retries);
        envelope.retry_count = retry_count;
        envelope
    }

    #[test]
    fn test_push_with_budget() {
        let queue = RetryQueue::new();
        assert!(queue.push(envelope_with_budget(0, 3)));
        assert!(queue.push(envelope_with_budget(2, 3)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_exhausted_budget_is_dropped() {
        let queue = RetryQueue::new();
        assert!(!queue.push(envelope_with_budget(3, 3)));
        assert!(!queue.push(envelope_with_budget(5, 3)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_take_all_drains() {
        let queue = RetryQueue::new();
        queue.push(envelope_with_budget(0, 3));
        queue.push(envelope_with_budget(1, 3));

        let drained = queue.take_all();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
        assert!(queue.take_all().is_empty());
    }
}
