//! # Triage Message Types
//!
//! Shared data model for the agent messaging stack: the logical [`Message`],
//! the [`Envelope`] transport wrapper that carries it, and the JSON wire
//! codec used by every transport.

pub mod envelope;
pub mod message;

// Re-export commonly used types
pub use envelope::{Envelope, ProtocolKind, TransportKind, DEFAULT_MAX_RETRIES};
pub use message::{Message, MessageKind, MessagePriority};

/// Wire-level errors.
///
/// Deserialization failures are the one error class that propagates to the
/// caller rather than being folded into a boolean delivery result.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Result type for wire encode/decode operations
pub type WireResult<T> = std::result::Result<T, WireError>;
