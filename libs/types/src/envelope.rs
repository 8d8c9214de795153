//! Envelope — the unit of transport.
//!
//! An envelope wraps exactly one [`Message`] with routing, retry and expiry
//! metadata. The protocol facade creates the envelope once; when a
//! destination resolves to multiple recipients the bus clones it per
//! recipient with [`Envelope::for_recipient`], so every clone shares the
//! message but carries its own destination.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::{WireError, WireResult};

/// Default retry budget for a freshly created envelope
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Which facade produced the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// Agent-facing protocol facade
    Agent,
    /// Bus-internal control traffic
    System,
}

/// Which channel should carry the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    InProcess,
    Push,
    Stream,
    PubSub,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::InProcess => "in_process",
            TransportKind::Push => "push",
            TransportKind::Stream => "stream",
            TransportKind::PubSub => "pub_sub",
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Transport wrapper around a [`Message`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Facade that produced this envelope
    pub protocol: ProtocolKind,

    /// Channel expected to carry this envelope
    pub transport: TransportKind,

    /// Logical address the envelope is sent to
    pub destination: String,

    /// Agent id of the originator
    pub source: String,

    /// The wrapped message
    pub message: Message,

    /// Transport headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Envelope creation time
    pub timestamp: DateTime<Utc>,

    /// Optional expiry; expired envelopes are discarded at receive time
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Retry attempts performed so far
    #[serde(default)]
    pub retry_count: u32,

    /// Retry budget before the envelope is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Envelope {
    /// Create an envelope around `message`
    pub fn new(
        protocol: ProtocolKind,
        transport: TransportKind,
        destination: impl Into<String>,
        source: impl Into<String>,
        message: Message,
    ) -> Self {
        Self {
            protocol,
            transport,
            destination: destination.into(),
            source: source.into(),
            message,
            headers: HashMap::new(),
            timestamp: Utc::now(),
            expires_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Add a transport header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set an absolute expiry time
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Override the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Per-recipient clone: shares the message, carries its own destination
    pub fn for_recipient(&self, recipient: &str) -> Envelope {
        let mut clone = self.clone();
        clone.destination = recipient.to_string();
        clone
    }

    /// True iff an expiry is set and has passed
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() > expires_at,
            None => false,
        }
    }

    /// True iff the retry budget has not been exhausted
    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Serialize to the JSON wire form
    pub fn to_json(&self) -> WireResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an envelope from its JSON wire form.
    ///
    /// Missing or malformed fields surface as [`WireError`] — parse failures
    /// are never silently swallowed.
    pub fn from_json(raw: &str) -> WireResult<Envelope> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Parse an envelope from raw wire bytes
    pub fn from_slice(raw: &[u8]) -> WireResult<Envelope> {
        let envelope: Envelope = serde_json::from_slice(raw)?;
        envelope.validate()?;
        Ok(envelope)
    }

    fn validate(&self) -> WireResult<()> {
        if self.destination.is_empty() {
            return Err(WireError::MissingField("destination"));
        }
        if self.source.is_empty() {
            return Err(WireError::MissingField("source"));
        }
        if self.message.id.is_empty() {
            return Err(WireError::MissingField("message.id"));
        }
        Ok(())
    }
}
