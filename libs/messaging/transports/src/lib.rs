//! # Triage Message Transports
//!
//! Pluggable delivery channels that carry serialized envelopes between
//! agents. Four implementations share one [`Transport`] contract:
//!
//! - [`InProcessTransport`] — direct delivery to a locally registered
//!   handler, with an internal queue as fallback
//! - [`PushTransport`] — HTTP POST of the JSON envelope to a per-destination
//!   endpoint, plus an embedded listener for inbound delivery
//! - [`StreamTransport`] — duplex TCP with length-prefixed JSON frames and a
//!   handshake-keyed connection table
//! - [`PubSubTransport`] — channel-named publish with a wildcard-subscribed
//!   background listener
//!
//! A [`TransportManager`] holds connected transports keyed by kind and
//! designates exactly one as active for outbound sends.

pub mod error;
pub mod inprocess;
pub mod manager;
pub mod metadata;
pub mod pubsub;
pub mod push;
pub mod stream;

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::warn;

use types::{Envelope, TransportKind};

pub use error::{SendContext, TransportError};
pub use inprocess::InProcessTransport;
pub use manager::TransportManager;
pub use metadata::{ConnectionState, TransportCounters, TransportMetadata};
pub use pubsub::{agent_channel, channel_matches, PubSubBroker, PubSubFrame, PubSubTransport};
pub use push::{PushTransport, PushTransportConfig};
pub use stream::{StreamTransport, StreamTransportConfig};

/// A delivery channel for envelopes, independently connectable.
///
/// `send` failures surface as [`TransportError`] to the caller and are
/// logged; they never crash the bus.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Establish the channel (may be a no-op if already connected)
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tear the channel down (may be a no-op if not connected)
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Carry one envelope toward its destination
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Pull the next inbound envelope, if any
    async fn receive(&self) -> Result<Option<Envelope>, TransportError>;

    /// True while the channel is usable
    fn is_connected(&self) -> bool;

    /// Which channel this is
    fn kind(&self) -> TransportKind;

    /// Channel metadata for debugging and monitoring
    fn metadata(&self) -> TransportMetadata;
}

/// Locally registered delivery callback used by the in-process and
/// pub/sub channels
#[async_trait]
pub trait LocalHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> Result<(), TransportError>;
}

/// Bounded buffer for inbound envelopes awaiting `receive`.
///
/// Overflow drops the oldest entry, matching the destination-queue policy.
#[derive(Debug)]
pub struct InboundQueue {
    entries: Mutex<VecDeque<Envelope>>,
    capacity: usize,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Buffer an inbound envelope, evicting the oldest at capacity
    pub fn push(&self, envelope: Envelope) {
        let mut entries = self.entries.lock().expect("inbound queue mutex poisoned");
        if self.capacity > 0 && entries.len() >= self.capacity {
            if let Some(evicted) = entries.pop_front() {
                warn!(
                    evicted_id = %evicted.message.id,
                    capacity = self.capacity,
                    "inbound queue at capacity, dropping oldest envelope"
                );
            }
        }
        entries.push_back(envelope);
    }

    /// Remove and return the oldest buffered envelope
    pub fn pop(&self) -> Option<Envelope> {
        self.entries
            .lock()
            .expect("inbound queue mutex poisoned")
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("inbound queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
