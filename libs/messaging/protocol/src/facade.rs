//! Per-agent protocol facade.
//!
//! Builds envelopes and drives the bus on behalf of one agent. Constructing
//! the facade registers the agent in the bus directory so it can be routed
//! to and counted by broadcasts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use bus_core::{MessageBus, BROADCAST_DESTINATION};
use types::{Envelope, Message, MessageKind, MessagePriority, ProtocolKind, TransportKind};

use crate::handler::{HandlerRegistry, MessageHandler, ReceiveOutcome, ReceiveStatus};

/// Target selection for a broadcast
#[derive(Debug, Clone)]
pub enum Recipients {
    /// Every agent currently registered
    All,
    /// Registered agents of one type
    OfType(String),
    /// An explicit recipient list
    Explicit(Vec<String>),
}

/// Optional knobs for a single send
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub priority: MessagePriority,
    /// Override the facade's protocol tag
    pub protocol: Option<ProtocolKind>,
    /// Override the facade's default transport tag
    pub transport: Option<TransportKind>,
    /// Absolute expiry for the envelope
    pub expires_at: Option<DateTime<Utc>>,
    /// Override the bus default retry budget
    pub max_retries: Option<u32>,
    /// Extra transport headers
    pub headers: HashMap<String, String>,
}

/// Per-agent API over the message bus
pub struct AgentProtocol {
    agent_id: String,
    agent_type: String,
    bus: MessageBus,
    handlers: HandlerRegistry,
    protocol: ProtocolKind,
    transport: TransportKind,
}

impl AgentProtocol {
    /// Create the facade and register the agent with the bus directory
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>, bus: MessageBus) -> Self {
        let agent_id = agent_id.into();
        let agent_type = agent_type.into();
        bus.router().register_agent(&agent_id, &agent_type);

        Self {
            agent_id,
            agent_type,
            bus,
            handlers: HandlerRegistry::new(),
            protocol: ProtocolKind::Agent,
            transport: TransportKind::InProcess,
        }
    }

    /// Set the default transport tag stamped on outgoing envelopes
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// Remove the agent from the bus directory
    pub fn detach(&self) {
        self.bus.router().unregister_agent(&self.agent_id);
    }

    /// Subscribe this agent to a topic
    pub fn subscribe_topic(&self, topic: &str) {
        self.bus.router().subscribe(topic, &self.agent_id);
    }

    /// Drop this agent's subscription to a topic
    pub fn unsubscribe_topic(&self, topic: &str) {
        self.bus.router().unsubscribe(topic, &self.agent_id);
    }

    /// Build and send one message; returns the bus delivery verdict
    pub async fn send_message(
        &self,
        recipient: &str,
        kind: MessageKind,
        content: Map<String, Value>,
    ) -> bool {
        self.send_message_with(recipient, kind, content, SendOptions::default())
            .await
    }

    /// `send_message` with explicit priority/transport/expiry/retry options
    pub async fn send_message_with(
        &self,
        recipient: &str,
        kind: MessageKind,
        content: Map<String, Value>,
        options: SendOptions,
    ) -> bool {
        let message = Message::new(kind, &self.agent_id, recipient, content)
            .with_priority(options.priority);

        let mut envelope = Envelope::new(
            options.protocol.unwrap_or(self.protocol),
            options.transport.unwrap_or(self.transport),
            recipient,
            &self.agent_id,
            message,
        )
        .with_max_retries(
            options
                .max_retries
                .unwrap_or(self.bus.config().default_max_retries),
        );
        if let Some(expires_at) = options.expires_at {
            envelope = envelope.with_expiry(expires_at);
        }
        for (key, value) in options.headers {
            envelope = envelope.with_header(key, value);
        }

        self.bus.send(envelope).await
    }

    /// Send one message per resolved recipient, excluding self.
    /// Returns the number of recipients whose send succeeded.
    pub async fn broadcast_message(
        &self,
        kind: MessageKind,
        content: Map<String, Value>,
        recipients: Recipients,
        priority: MessagePriority,
    ) -> usize {
        let targets: Vec<String> = match recipients {
            Recipients::All => self.bus.router().agent_ids(),
            Recipients::OfType(agent_type) => self.bus.router().agents_of_type(&agent_type),
            Recipients::Explicit(list) => list,
        };

        let mut delivered = 0;
        for target in targets {
            if target == self.agent_id {
                continue;
            }
            let options = SendOptions {
                priority,
                ..SendOptions::default()
            };
            if self
                .send_message_with(&target, kind, content.clone(), options)
                .await
            {
                delivered += 1;
            }
        }
        debug!(
            agent_id = %self.agent_id,
            delivered,
            "broadcast complete"
        );
        delivered
    }

    /// Reply to `original`, linking the response through `correlation_id`
    /// and `reply_to`
    pub async fn reply_to_message(&self, original: &Message, content: Map<String, Value>) -> bool {
        let mut message = Message::new(
            MessageKind::Response,
            &self.agent_id,
            &original.sender_id,
            content,
        );
        message.correlation_id = Some(original.id.clone());
        message.reply_to = Some(original.id.clone());

        let envelope = Envelope::new(
            self.protocol,
            self.transport,
            original.sender_id.clone(),
            self.agent_id.clone(),
            message,
        )
        .with_max_retries(self.bus.config().default_max_retries);

        self.bus.send(envelope).await
    }

    /// Register a handler for a message kind.
    ///
    /// The enum key makes unknown kinds unrepresentable, so registration
    /// needs no further validation.
    pub fn register_message_handler(&self, kind: MessageKind, handler: Arc<dyn MessageHandler>) {
        self.handlers.register(kind, handler);
    }

    /// Remove every handler for `kind`; returns `false` when none existed
    pub fn unregister_message_handler(&self, kind: MessageKind) -> bool {
        self.handlers.unregister(kind)
    }

    /// Accept an inbound envelope and dispatch it to the local handler table.
    ///
    /// Expired envelopes and envelopes addressed elsewhere are rejected
    /// before any handler runs. Individual handler failures are recorded in
    /// the outcome without aborting the other handlers.
    pub async fn receive_message(&self, envelope: Envelope) -> ReceiveOutcome {
        if envelope.is_expired() {
            debug!(
                agent_id = %self.agent_id,
                message_id = %envelope.message.id,
                "rejecting expired envelope"
            );
            return ReceiveOutcome::status(ReceiveStatus::Expired);
        }

        if envelope.destination != self.agent_id && envelope.destination != BROADCAST_DESTINATION {
            warn!(
                agent_id = %self.agent_id,
                destination = %envelope.destination,
                message_id = %envelope.message.id,
                "rejecting envelope addressed to another agent"
            );
            return ReceiveOutcome::status(ReceiveStatus::WrongRecipient);
        }

        let results = self.handlers.dispatch(&envelope).await;
        if results.is_empty() {
            ReceiveOutcome::status(ReceiveStatus::NoHandler)
        } else {
            ReceiveOutcome {
                status: ReceiveStatus::Handled,
                results,
            }
        }
    }
}
