//! # Agent Protocol Facade
//!
//! The per-agent API over the message bus: send, broadcast, reply, receive,
//! and a typed dispatch table mapping message kind to handlers. Each agent
//! constructs one [`AgentProtocol`] around a shared
//! [`bus_core::MessageBus`] handle; constructing the facade registers the
//! agent in the bus directory, [`AgentProtocol::detach`] removes it.

pub mod bridge;
pub mod facade;
pub mod handler;

pub use bridge::{spawn_inbound_pump, BusForwarder};
pub use facade::{AgentProtocol, Recipients, SendOptions};
pub use handler::{HandlerRegistry, MessageHandler, ReceiveOutcome, ReceiveStatus};

/// Facade-level errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message expired")]
    Expired,

    #[error("wrong recipient: envelope addressed to '{0}'")]
    WrongRecipient(String),

    #[error("handler failed: {0}")]
    Handler(String),
}

/// Result type for facade operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
