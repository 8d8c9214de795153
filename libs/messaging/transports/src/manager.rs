//! Transport registry with a single active outbound channel.
//!
//! Any number of transports may be connected simultaneously for inbound
//! listening; exactly one is designated active and receives outbound sends.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::{info, warn};

use types::{Envelope, TransportKind};

use crate::error::TransportError;
use crate::Transport;

/// Registry of delivery channels keyed by [`TransportKind`]
#[derive(Default)]
pub struct TransportManager {
    transports: DashMap<TransportKind, Arc<dyn Transport>>,
    active: RwLock<Option<TransportKind>>,
}

impl std::fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportManager")
            .field("registered", &self.kinds())
            .field("active", &self.active_kind())
            .finish()
    }
}

impl TransportManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport under its own kind, replacing any previous one.
    /// The first registration becomes active automatically.
    pub fn register(&self, transport: Arc<dyn Transport>) {
        let kind = transport.kind();
        self.transports.insert(kind, transport);

        let mut active = self.active.write().expect("transport manager lock poisoned");
        if active.is_none() {
            *active = Some(kind);
            info!(?kind, "first transport registered, marked active");
        }
    }

    /// Look up a registered transport
    pub fn get(&self, kind: TransportKind) -> Option<Arc<dyn Transport>> {
        self.transports.get(&kind).map(|entry| entry.value().clone())
    }

    /// Registered transport kinds
    pub fn kinds(&self) -> Vec<TransportKind> {
        self.transports.iter().map(|entry| *entry.key()).collect()
    }

    /// Designate the active outbound transport.
    /// Fails when the kind has not been registered.
    pub fn set_active(&self, kind: TransportKind) -> Result<(), TransportError> {
        if !self.transports.contains_key(&kind) {
            return Err(TransportError::InvalidConfig(format!(
                "transport {:?} is not registered",
                kind
            )));
        }
        *self.active.write().expect("transport manager lock poisoned") = Some(kind);
        info!(?kind, "active transport switched");
        Ok(())
    }

    /// Kind of the active transport, if one is set
    pub fn active_kind(&self) -> Option<TransportKind> {
        *self.active.read().expect("transport manager lock poisoned")
    }

    /// The active transport, if one is set and registered
    pub fn active(&self) -> Option<Arc<dyn Transport>> {
        self.active_kind().and_then(|kind| self.get(kind))
    }

    /// Send through the active transport
    pub async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let transport = self.active().ok_or_else(|| {
            TransportError::NotConnected("no active transport".to_string())
        })?;
        transport.send(envelope).await
    }

    /// Connect every registered transport; returns how many connected.
    /// Individual failures are logged and do not stop the rest.
    pub async fn connect_all(&self) -> usize {
        let mut connected = 0;
        for kind in self.kinds() {
            if let Some(transport) = self.get(kind) {
                match transport.connect().await {
                    Ok(()) => connected += 1,
                    Err(e) => warn!(?kind, "transport connect failed: {}", e),
                }
            }
        }
        connected
    }

    /// Disconnect every registered transport; returns how many disconnected
    pub async fn disconnect_all(&self) -> usize {
        let mut disconnected = 0;
        for kind in self.kinds() {
            if let Some(transport) = self.get(kind) {
                match transport.disconnect().await {
                    Ok(()) => disconnected += 1,
                    Err(e) => warn!(?kind, "transport disconnect failed: {}", e),
                }
            }
        }
        disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inprocess::InProcessTransport;
    use crate::pubsub::{PubSubBroker, PubSubTransport};
    use serde_json::Map;
    use types::{Message, MessageKind, ProtocolKind};

    fn envelope_to(destination: &str) -> Envelope {
        let message = Message::new(MessageKind::Notification, "alpha", destination, Map::new());
        Envelope::new(
            ProtocolKind::Agent,
            TransportKind::InProcess,
            destination,
            "alpha",
            message,
        )
    }

    #[tokio::test]
    async fn test_first_registration_becomes_active() {
        let manager = TransportManager::new();
        manager.register(Arc::new(InProcessTransport::default()));

        assert_eq!(manager.active_kind(), Some(TransportKind::InProcess));
        assert!(manager.get(TransportKind::InProcess).is_some());
    }

    #[tokio::test]
    async fn test_set_active_requires_registration() {
        let manager = TransportManager::new();
        manager.register(Arc::new(InProcessTransport::default()));

        let result = manager.set_active(TransportKind::Stream);
        assert!(matches!(result, Err(TransportError::InvalidConfig(_))));

        manager.register(Arc::new(PubSubTransport::new(PubSubBroker::default(), 16)));
        manager.set_active(TransportKind::PubSub).unwrap();
        assert_eq!(manager.active_kind(), Some(TransportKind::PubSub));
    }

    #[tokio::test]
    async fn test_send_through_active_transport() {
        let manager = TransportManager::new();
        let transport = Arc::new(InProcessTransport::default());
        manager.register(transport.clone());

        assert_eq!(manager.connect_all().await, 1);
        manager.send(envelope_to("beta")).await.unwrap();
        assert_eq!(transport.queued(), 1);

        assert_eq!(manager.disconnect_all().await, 1);
    }

    #[tokio::test]
    async fn test_send_without_active_transport_fails() {
        let manager = TransportManager::new();
        let result = manager.send(envelope_to("beta")).await;
        assert!(matches!(result, Err(TransportError::NotConnected(_))));
    }

    #[tokio::test]
    async fn test_multiple_transports_connected_simultaneously() {
        let manager = TransportManager::new();
        manager.register(Arc::new(InProcessTransport::default()));
        manager.register(Arc::new(PubSubTransport::new(PubSubBroker::default(), 16)));

        assert_eq!(manager.connect_all().await, 2);
        // Outbound still goes through exactly one
        assert_eq!(manager.active_kind(), Some(TransportKind::InProcess));
    }
}
