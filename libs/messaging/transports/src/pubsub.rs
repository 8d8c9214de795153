//! Publish/subscribe transport.
//!
//! Outbound sends publish the envelope to a channel named
//! `agent:{destination}` on a shared [`PubSubBroker`]. A background listener
//! subscribes with the wildcard pattern `agent:*` and buffers every frame
//! whose embedded destination is locally registered; everything else is
//! ignored. Publishing to a channel nobody listens on succeeds with zero
//! receivers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use types::{Envelope, TransportKind};

use crate::error::TransportError;
use crate::metadata::{ConnectionState, TransportCounters, TransportMetadata};
use crate::{InboundQueue, Transport};

/// Wildcard pattern the listening side subscribes with
pub const AGENT_CHANNEL_PATTERN: &str = "agent:*";

/// Channel name for envelopes addressed to `destination`
pub fn agent_channel(destination: &str) -> String {
    format!("agent:{}", destination)
}

/// Match a channel name against a subscription pattern.
///
/// `*` matches everything, a trailing `*` matches by prefix, anything else
/// must match exactly.
pub fn channel_matches(pattern: &str, channel: &str) -> bool {
    if pattern == "*" {
        true
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        channel.starts_with(prefix)
    } else {
        pattern == channel
    }
}

/// One published frame: the channel name plus the envelope it carries
#[derive(Debug, Clone)]
pub struct PubSubFrame {
    pub channel: String,
    pub envelope: Envelope,
}

/// Shared in-process broker carrying published frames to every subscriber
#[derive(Debug, Clone)]
pub struct PubSubBroker {
    sender: broadcast::Sender<PubSubFrame>,
}

impl PubSubBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a frame; returns the number of subscribers that received it.
    /// Zero subscribers is not an error.
    pub fn publish(&self, channel: &str, envelope: Envelope) -> usize {
        let frame = PubSubFrame {
            channel: channel.to_string(),
            envelope,
        };
        self.sender.send(frame).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PubSubFrame> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PubSubBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Topic-style delivery channel over a shared broker
pub struct PubSubTransport {
    broker: PubSubBroker,
    pattern: String,
    /// Destinations this side accepts frames for
    registered: Arc<DashMap<String, ()>>,
    inbound: Arc<InboundQueue>,
    stop: Mutex<Option<CancellationToken>>,
    connected: AtomicBool,
    counters: Arc<TransportCounters>,
}

impl std::fmt::Debug for PubSubTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubTransport")
            .field("pattern", &self.pattern)
            .field("registered", &self.registered.len())
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl PubSubTransport {
    pub fn new(broker: PubSubBroker, inbound_capacity: usize) -> Self {
        Self {
            broker,
            pattern: AGENT_CHANNEL_PATTERN.to_string(),
            registered: Arc::new(DashMap::new()),
            inbound: Arc::new(InboundQueue::new(inbound_capacity)),
            stop: Mutex::new(None),
            connected: AtomicBool::new(false),
            counters: Arc::new(TransportCounters::default()),
        }
    }

    /// Accept inbound frames addressed to `destination`
    pub fn register_destination(&self, destination: &str) {
        self.registered.insert(destination.to_string(), ());
    }

    /// Stop accepting frames for `destination`; returns `false` when absent
    pub fn unregister_destination(&self, destination: &str) -> bool {
        self.registered.remove(destination).is_some()
    }

    async fn listen_loop(
        mut rx: broadcast::Receiver<PubSubFrame>,
        pattern: String,
        registered: Arc<DashMap<String, ()>>,
        inbound: Arc<InboundQueue>,
        counters: Arc<TransportCounters>,
        stop: CancellationToken,
    ) {
        debug!(%pattern, "pub/sub listener started");
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                frame = rx.recv() => match frame {
                    Ok(frame) => {
                        if !channel_matches(&pattern, &frame.channel) {
                            continue;
                        }
                        let destination = frame.envelope.destination.clone();
                        if registered.contains_key(&destination) {
                            counters.record_received();
                            inbound.push(frame.envelope);
                        } else {
                            debug!(
                                channel = %frame.channel,
                                %destination,
                                "no local registration, ignoring frame"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(dropped)) => {
                        warn!(dropped, "pub/sub listener lagged, frames dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        debug!(%pattern, "pub/sub listener stopped");
    }
}

#[async_trait]
impl Transport for PubSubTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }

        let stop = CancellationToken::new();
        tokio::spawn(Self::listen_loop(
            self.broker.subscribe(),
            self.pattern.clone(),
            self.registered.clone(),
            self.inbound.clone(),
            self.counters.clone(),
            stop.clone(),
        ));

        *self.stop.lock().expect("stop mutex poisoned") = Some(stop);
        self.connected.store(true, Ordering::Relaxed);
        info!(pattern = %self.pattern, "pub/sub transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(stop) = self.stop.lock().expect("stop mutex poisoned").take() {
            stop.cancel();
        }
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected(
                "pub/sub transport not connected".to_string(),
            ));
        }

        let channel = agent_channel(&envelope.destination);
        let receivers = self.broker.publish(&channel, envelope);
        self.counters.record_sent();
        debug!(%channel, receivers, "envelope published");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Envelope>, TransportError> {
        Ok(self.inbound.pop())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::PubSub
    }

    fn metadata(&self) -> TransportMetadata {
        let state = if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        TransportMetadata::new("pub-sub", TransportKind::PubSub)
            .with_endpoint(self.pattern.clone())
            .with_state(state)
            .with_counters(&self.counters)
    }
}
