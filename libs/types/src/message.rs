//! Logical message payload exchanged between agents.
//!
//! A [`Message`] is immutable after creation: the bus and transports wrap it
//! in an [`crate::Envelope`] and never mutate the message itself. Replies are
//! linked to their originals through `correlation_id` / `reply_to`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of message being exchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Notification,
    Error,
    Broadcast,
}

impl MessageKind {
    /// Stable string tag, matching the wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Notification => "notification",
            MessageKind::Error => "error",
            MessageKind::Broadcast => "broadcast",
        }
    }
}

/// Message priority for queueing decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

/// Logical payload routed between agents.
///
/// `content` is an open JSON map; well-known keys (e.g. `"topic"`) are read
/// by the router but never required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id (UUID v4)
    pub id: String,

    /// Agent id of the sender
    pub sender_id: String,

    /// Agent id of the intended receiver
    pub receiver_id: String,

    /// Message kind
    pub kind: MessageKind,

    /// Queueing priority
    #[serde(default)]
    pub priority: MessagePriority,

    /// Arbitrary content map
    #[serde(default)]
    pub content: Map<String, Value>,

    /// Creation timestamp (ISO-8601 on the wire)
    pub timestamp: DateTime<Utc>,

    /// Links a response back to the request it answers
    #[serde(default)]
    pub correlation_id: Option<String>,

    /// Id of the message this one replies to
    #[serde(default)]
    pub reply_to: Option<String>,
}

impl Message {
    /// Create a new message with a fresh id and current timestamp
    pub fn new(
        kind: MessageKind,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        content: Map<String, Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            kind,
            priority: MessagePriority::Normal,
            content,
            timestamp: Utc::now(),
            correlation_id: None,
            reply_to: None,
        }
    }

    /// Shorthand for a request message
    pub fn request(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        content: Map<String, Value>,
    ) -> Self {
        Self::new(MessageKind::Request, sender_id, receiver_id, content)
    }

    /// Shorthand for a notification message
    pub fn notification(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        content: Map<String, Value>,
    ) -> Self {
        Self::new(MessageKind::Notification, sender_id, receiver_id, content)
    }

    /// Build a response linked to `original` via correlation and reply ids
    pub fn response_to(original: &Message, content: Map<String, Value>) -> Self {
        let mut message = Self::new(
            MessageKind::Response,
            original.receiver_id.clone(),
            original.sender_id.clone(),
            content,
        );
        message.correlation_id = Some(original.id.clone());
        message.reply_to = Some(original.id.clone());
        message
    }

    /// Set priority
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set correlation id
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Topic named by the content map, if any.
    ///
    /// The router unions topic subscribers into the recipient set when this
    /// returns `Some`.
    pub fn topic(&self) -> Option<&str> {
        self.content.get("topic").and_then(Value::as_str)
    }
}
