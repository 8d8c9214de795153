//! Connection state and metadata shared by all transports.

use std::sync::atomic::{AtomicU64, Ordering};

use types::TransportKind;

/// Lifecycle state of a transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionState {
    /// True when the connection can carry traffic
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True when a connect attempt is permitted
    pub fn can_connect(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

/// Send/receive counters kept by every transport
#[derive(Debug, Default)]
pub struct TransportCounters {
    pub messages_sent: AtomicU64,
    pub messages_failed: AtomicU64,
    pub messages_received: AtomicU64,
}

impl TransportCounters {
    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.messages_failed.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }
}

/// Transport metadata for debugging and monitoring
#[derive(Debug, Clone)]
pub struct TransportMetadata {
    /// Human-readable transport name
    pub name: String,
    /// Which channel this is
    pub kind: TransportKind,
    /// Endpoint description (address, pattern), if any
    pub endpoint: Option<String>,
    /// Current connection state
    pub state: ConnectionState,
    /// Envelopes sent successfully
    pub messages_sent: u64,
    /// Envelopes that failed to send
    pub messages_failed: u64,
    /// Envelopes received from the channel
    pub messages_received: u64,
}

impl TransportMetadata {
    pub fn new(name: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            name: name.into(),
            kind,
            endpoint: None,
            state: ConnectionState::Disconnected,
            messages_sent: 0,
            messages_failed: 0,
            messages_received: 0,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }

    pub fn with_counters(mut self, counters: &TransportCounters) -> Self {
        self.messages_sent = counters.sent();
        self.messages_failed = counters.failed();
        self.messages_received = counters.received();
        self
    }
}
