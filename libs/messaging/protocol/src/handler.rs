//! Typed per-kind handler registry.
//!
//! Handlers are keyed by the [`MessageKind`] enum, so an unknown kind is
//! unrepresentable at registration time — validation happens when the key is
//! constructed, not at dispatch. Several handlers may share a kind; dispatch
//! runs them in registration order and aggregates every result, catching
//! individual failures without aborting the rest.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;

use types::{Envelope, MessageKind};

use crate::ProtocolError;

/// Agent-registered callback for one message kind
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, envelope: &Envelope) -> Result<Value, ProtocolError>;
}

/// Dispatch table from message kind to handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<MessageKind, Vec<Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `kind`
    pub fn register(&self, kind: MessageKind, handler: Arc<dyn MessageHandler>) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    /// Remove every handler for `kind`; returns `false` when none existed
    pub fn unregister(&self, kind: MessageKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    /// Number of handlers registered for `kind`
    pub fn handler_count(&self, kind: MessageKind) -> usize {
        self.handlers
            .get(&kind)
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }

    /// Run every handler registered for the envelope's message kind.
    ///
    /// A failing handler is recorded and logged; the remaining handlers
    /// still run.
    pub async fn dispatch(&self, envelope: &Envelope) -> Vec<Result<Value, String>> {
        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .handlers
            .get(&envelope.message.kind)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        let mut results = Vec::with_capacity(handlers.len());
        for handler in handlers {
            match handler.on_message(envelope).await {
                Ok(value) => results.push(Ok(value)),
                Err(e) => {
                    warn!(
                        message_id = %envelope.message.id,
                        kind = envelope.message.kind.as_str(),
                        error = %e,
                        "message handler failed"
                    );
                    results.push(Err(e.to_string()));
                }
            }
        }
        results
    }
}

/// How the facade disposed of a received envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// Dispatched to at least one handler
    Handled,
    /// Valid envelope, but no handler registered for its kind
    NoHandler,
    /// Expiry had passed; no handler was invoked
    Expired,
    /// Destination named neither this agent nor the broadcast address
    WrongRecipient,
}

impl ReceiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiveStatus::Handled => "handled",
            ReceiveStatus::NoHandler => "no_handler",
            ReceiveStatus::Expired => "expired",
            ReceiveStatus::WrongRecipient => "wrong_recipient",
        }
    }
}

/// Aggregated result of `receive_message`
#[derive(Debug)]
pub struct ReceiveOutcome {
    pub status: ReceiveStatus,
    /// Per-handler results, in registration order
    pub results: Vec<Result<Value, String>>,
}

impl ReceiveOutcome {
    pub fn status(status: ReceiveStatus) -> Self {
        Self {
            status,
            results: Vec::new(),
        }
    }

    /// Handlers that completed successfully
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Handlers that returned an error
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_err()).count()
    }
}
