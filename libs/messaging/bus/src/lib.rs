//! # Triage Message Bus Core
//!
//! Routing, queueing, retry and dispatch infrastructure shared by every agent
//! in the system. The bus accepts an [`types::Envelope`], resolves recipients
//! through the [`Router`], enqueues a per-recipient clone onto each
//! destination's bounded queue, and drives delivery through per-destination
//! dispatch workers plus periodic cleanup and retry loops.
//!
//! The components are deliberately independent: [`DestinationQueue`],
//! [`Router`], [`RetryQueue`] and [`BusMetrics`] are plain, separately
//! testable types composed by the [`MessageBus`] coordinator.

pub mod bus;
pub mod config;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod router;

// Re-export commonly used types
pub use bus::{EnvelopeHandler, MessageBus};
pub use config::BusConfig;
pub use metrics::{BusMetrics, BusMetricsSnapshot};
pub use queue::DestinationQueue;
pub use retry::RetryQueue;
pub use router::{AgentInfo, Router, BROADCAST_DESTINATION};

/// Bus-level errors
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no recipients resolved for destination '{0}'")]
    Routing(String),

    #[error("enqueue rejected for destination '{0}'")]
    Delivery(String),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bus is shut down")]
    Shutdown,

    #[error("wire error: {0}")]
    Wire(#[from] types::WireError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bus operations
pub type BusResult<T> = std::result::Result<T, BusError>;
