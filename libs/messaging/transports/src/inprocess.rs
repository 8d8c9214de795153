//! In-process transport: delivers directly to a locally registered handler,
//! falling back to an internal queue when no handler is registered for the
//! destination.
//!
//! This is the fast path for agents sharing a process with the bus — no
//! serialization, no sockets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use types::{Envelope, TransportKind};

use crate::error::{SendContext, TransportError};
use crate::metadata::{ConnectionState, TransportCounters, TransportMetadata};
use crate::{InboundQueue, LocalHandler, Transport};

/// Default bound for the fallback queue
const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Direct in-process delivery channel
pub struct InProcessTransport {
    handlers: DashMap<String, Arc<dyn LocalHandler>>,
    queue: InboundQueue,
    connected: AtomicBool,
    counters: TransportCounters,
}

impl std::fmt::Debug for InProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessTransport")
            .field("handlers", &self.handlers.len())
            .field("queued", &self.queue.len())
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl InProcessTransport {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            handlers: DashMap::new(),
            queue: InboundQueue::new(queue_capacity),
            connected: AtomicBool::new(false),
            counters: TransportCounters::default(),
        }
    }

    /// Register a delivery handler for `destination`
    pub fn register_handler(&self, destination: &str, handler: Arc<dyn LocalHandler>) {
        self.handlers.insert(destination.to_string(), handler);
    }

    /// Remove the handler for `destination`; returns `false` when absent
    pub fn unregister_handler(&self, destination: &str) -> bool {
        self.handlers.remove(destination).is_some()
    }

    /// Envelopes waiting in the fallback queue
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected(
                "in-process transport not connected".to_string(),
            ));
        }

        let handler = self
            .handlers
            .get(&envelope.destination)
            .map(|entry| entry.value().clone());

        match handler {
            Some(handler) => {
                let message_id = envelope.message.id.clone();
                let destination = envelope.destination.clone();
                if let Err(e) = handler.handle(envelope).await {
                    self.counters.record_failed();
                    return Err(TransportError::send_failed(
                        e.to_string(),
                        SendContext::new(0)
                            .with_message_id(message_id)
                            .with_destination(destination),
                    ));
                }
                self.counters.record_sent();
                Ok(())
            }
            None => {
                // No handler registered: hold the envelope for a future receive
                debug!(
                    destination = %envelope.destination,
                    message_id = %envelope.message.id,
                    "no local handler, queueing envelope"
                );
                self.queue.push(envelope);
                self.counters.record_sent();
                Ok(())
            }
        }
    }

    async fn receive(&self) -> Result<Option<Envelope>, TransportError> {
        let envelope = self.queue.pop();
        if envelope.is_some() {
            self.counters.record_received();
        }
        Ok(envelope)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::InProcess
    }

    fn metadata(&self) -> TransportMetadata {
        let state = if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        TransportMetadata::new("in-process", TransportKind::InProcess)
            .with_state(state)
            .with_counters(&self.counters)
    }
}
