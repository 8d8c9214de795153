//! # Destination Routing - Recipient Resolution
//!
//! ## Purpose
//! Resolves a destination name into the set of recipient agent ids. Three
//! sources feed the resolution: direct routes, topic subscriptions named by
//! message content, and the broadcast address which fans out to every
//! registered agent except the sender.
//!
//! ## Data
//! - `routes`: destination name → subscriber set (direct delivery)
//! - `subscriptions`: topic name → subscriber set (fan-out by content)
//! - `agents`: registered agent directory (id → [`AgentInfo`]), also used by
//!   the protocol facade for type-filtered broadcast
//!
//! All mutations are idempotent: removing an absent entry is a no-op, and a
//! subscriber set left empty by a removal deletes the table entry.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use types::Envelope;

/// The literal destination that fans out to every registered agent
pub const BROADCAST_DESTINATION: &str = "broadcast";

/// Directory entry for a registered agent
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub agent_type: String,
    pub registered_at: DateTime<Utc>,
}

/// Resolves destinations to recipient sets
#[derive(Debug, Default)]
pub struct Router {
    /// Direct routes: destination name → subscriber ids
    routes: DashMap<String, HashSet<String>>,
    /// Topic subscriptions: topic name → subscriber ids
    subscriptions: DashMap<String, HashSet<String>>,
    /// Registered agent directory
    agents: DashMap<String, AgentInfo>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent in the directory and route its own id to itself.
    ///
    /// Idempotent: re-registering updates the directory entry in place.
    pub fn register_agent(&self, agent_id: &str, agent_type: &str) {
        self.agents.insert(
            agent_id.to_string(),
            AgentInfo {
                agent_type: agent_type.to_string(),
                registered_at: Utc::now(),
            },
        );
        self.add_route(agent_id, agent_id);
        debug!(agent_id, agent_type, "agent registered");
    }

    /// Remove an agent from the directory, its self-route and every
    /// subscription it holds
    pub fn unregister_agent(&self, agent_id: &str) {
        self.agents.remove(agent_id);
        self.remove_route(agent_id, agent_id);
        self.unsubscribe_all(agent_id);
        debug!(agent_id, "agent unregistered");
    }

    /// True when the agent id is present in the directory
    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Ids of every registered agent
    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Ids of registered agents with the given type
    pub fn agents_of_type(&self, agent_type: &str) -> Vec<String> {
        self.agents
            .iter()
            .filter(|entry| entry.value().agent_type == agent_type)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of registered agents
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Add `subscriber` to the direct-route set of `destination` (idempotent)
    pub fn add_route(&self, destination: &str, subscriber: &str) {
        self.routes
            .entry(destination.to_string())
            .or_default()
            .insert(subscriber.to_string());
    }

    /// Remove `subscriber` from the direct-route set of `destination`.
    ///
    /// A no-op when absent; deletes the table entry when the set empties.
    pub fn remove_route(&self, destination: &str, subscriber: &str) {
        let emptied = match self.routes.get_mut(destination) {
            Some(mut subscribers) => {
                subscribers.remove(subscriber);
                subscribers.is_empty()
            }
            None => false,
        };
        if emptied {
            self.routes.remove(destination);
        }
    }

    /// Subscribe `subscriber` to `topic` (idempotent)
    pub fn subscribe(&self, topic: &str, subscriber: &str) {
        self.subscriptions
            .entry(topic.to_string())
            .or_default()
            .insert(subscriber.to_string());
        debug!(topic, subscriber, "topic subscription added");
    }

    /// Unsubscribe `subscriber` from `topic`; deletes the entry when empty
    pub fn unsubscribe(&self, topic: &str, subscriber: &str) {
        let emptied = match self.subscriptions.get_mut(topic) {
            Some(mut subscribers) => {
                subscribers.remove(subscriber);
                subscribers.is_empty()
            }
            None => false,
        };
        if emptied {
            self.subscriptions.remove(topic);
        }
    }

    /// Remove `subscriber` from every topic it subscribes to
    pub fn unsubscribe_all(&self, subscriber: &str) {
        let topics: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().contains(subscriber))
            .map(|entry| entry.key().clone())
            .collect();
        for topic in topics {
            self.unsubscribe(&topic, subscriber);
        }
    }

    /// Resolve the recipient set for `envelope`.
    ///
    /// The result is the deduplicated union of the direct-route set for the
    /// destination, the subscriber set of any topic named by the message
    /// content, and (for the broadcast destination) every registered agent —
    /// always minus the envelope's own source. An empty result means nothing
    /// resolved and the send fails without anything being queued.
    pub fn route_message(&self, envelope: &Envelope) -> HashSet<String> {
        let mut recipients = HashSet::new();

        if let Some(subscribers) = self.routes.get(&envelope.destination) {
            recipients.extend(subscribers.iter().cloned());
        }

        if let Some(topic) = envelope.message.topic() {
            if let Some(subscribers) = self.subscriptions.get(topic) {
                recipients.extend(subscribers.iter().cloned());
            }
        }

        if envelope.destination == BROADCAST_DESTINATION {
            for entry in self.agents.iter() {
                recipients.insert(entry.key().clone());
            }
        }

        recipients.remove(&envelope.source);
        recipients
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};
    use types::{Message, MessageKind, ProtocolKind, TransportKind};

    fn envelope_to(destination: &str, source: &str) -> Envelope {
        let message = Message::new(MessageKind::Notification, source, destination, Map::new());
        Envelope::new(
            ProtocolKind::Agent,
            TransportKind::InProcess,
            destination,
            source,
            message,
        )
    }

    fn envelope_with_topic(destination: &str, source: &str, topic: &str) -> Envelope {
        let mut content = Map::new();
        content.insert("topic".to_string(), Value::from(topic));
        let message = Message::new(MessageKind::Notification, source, destination, content);
        Envelope::new(
            ProtocolKind::Agent,
            TransportKind::InProcess,
            destination,
            source,
            message,
        )
    }

    #[test]
    fn test_registration_creates_self_route() {
        let router = Router::new();
        router.register_agent("beta", "responder");

        let recipients = router.route_message(&envelope_to("beta", "alpha"));
        assert_eq!(recipients.len(), 1);
        assert!(recipients.contains("beta"));
    }

    #[test]
    fn test_unknown_destination_resolves_empty() {
        let router = Router::new();
        let recipients = router.route_message(&envelope_to("alpha", "zeta"));
        assert!(recipients.is_empty());
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let router = Router::new();
        router.register_agent("a", "responder");
        router.register_agent("b", "responder");
        router.register_agent("c", "coordinator");

        let recipients = router.route_message(&envelope_to(BROADCAST_DESTINATION, "a"));
        assert_eq!(recipients.len(), 2);
        assert!(recipients.contains("b"));
        assert!(recipients.contains("c"));
        assert!(!recipients.contains("a"));
    }

    #[test]
    fn test_sender_never_routed_to_itself() {
        let router = Router::new();
        router.register_agent("a", "responder");
        router.subscribe("incident.fire", "a");

        // Direct send to self resolves empty
        let direct = router.route_message(&envelope_to("a", "a"));
        assert!(direct.is_empty());

        // Topic routing also excludes the source
        let topical = router.route_message(&envelope_with_topic("a", "a", "incident.fire"));
        assert!(topical.is_empty());
    }

    #[test]
    fn test_topic_subscribers_are_unioned() {
        let router = Router::new();
        router.register_agent("b", "responder");
        router.subscribe("incident.fire", "c");
        router.subscribe("incident.fire", "d");

        let recipients = router.route_message(&envelope_with_topic("b", "a", "incident.fire"));
        assert_eq!(recipients.len(), 3);
        assert!(recipients.contains("b"));
        assert!(recipients.contains("c"));
        assert!(recipients.contains("d"));
    }

    #[test]
    fn test_route_mutation_is_idempotent() {
        let router = Router::new();
        router.add_route("dest", "x");
        router.add_route("dest", "x");

        let recipients = router.route_message(&envelope_to("dest", "src"));
        assert_eq!(recipients.len(), 1);

        // Removing twice is a no-op the second time
        router.remove_route("dest", "x");
        router.remove_route("dest", "x");
        router.remove_route("never-added", "x");

        assert!(router.route_message(&envelope_to("dest", "src")).is_empty());
    }

    #[test]
    fn test_empty_subscriber_set_deletes_entry() {
        let router = Router::new();
        router.subscribe("topic.a", "x");
        router.unsubscribe("topic.a", "x");

        // Internal table entry is gone, not just empty
        assert!(router.subscriptions.get("topic.a").is_none());
    }

    #[test]
    fn test_unregister_removes_subscriptions() {
        let router = Router::new();
        router.register_agent("b", "responder");
        router.subscribe("incident.flood", "b");

        router.unregister_agent("b");

        let recipients = router.route_message(&envelope_with_topic("x", "a", "incident.flood"));
        assert!(recipients.is_empty());
        assert!(!router.is_registered("b"));
    }

    #[test]
    fn test_agents_of_type_filter() {
        let router = Router::new();
        router.register_agent("medic-1", "medic");
        router.register_agent("medic-2", "medic");
        router.register_agent("dispatch-1", "coordinator");

        let mut medics = router.agents_of_type("medic");
        medics.sort();
        assert_eq!(medics, vec!["medic-1", "medic-2"]);
        assert!(router.agents_of_type("unknown").is_empty());
    }
}
