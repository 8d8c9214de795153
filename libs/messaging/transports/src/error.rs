//! Transport error types.

/// Context captured when a send fails, to aid debugging
#[derive(Debug, Clone, Default)]
pub struct SendContext {
    /// Id of the message being carried, if known
    pub message_id: Option<String>,
    /// Destination the envelope was addressed to
    pub destination: Option<String>,
    /// Serialized payload size in bytes
    pub payload_size: usize,
}

impl SendContext {
    pub fn new(payload_size: usize) -> Self {
        Self {
            message_id: None,
            destination: None,
            payload_size,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// Channel-level failures surfaced to the caller
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("send failed: {error} (size: {size}B, id: {id:?}, destination: {destination:?})",
            size = context.payload_size,
            id = context.message_id,
            destination = context.destination)]
    SendFailed { error: String, context: SendContext },

    #[error("handshake violation: {0}")]
    Handshake(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("wire error: {0}")]
    Wire(#[from] types::WireError),

    #[error("IO error: {0}")]
    Io(String),
}

impl TransportError {
    /// Create a connection failed error
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        TransportError::ConnectionFailed(msg.into())
    }

    /// Create a send failed error with context
    pub fn send_failed(msg: impl Into<String>, context: SendContext) -> Self {
        TransportError::SendFailed {
            error: msg.into(),
            context,
        }
    }

    /// True for failures worth re-attempting
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionLost(_)
                | TransportError::Timeout(_)
                | TransportError::SendFailed { .. }
        )
    }

    /// True for connect/disconnect-level failures
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionFailed(_)
                | TransportError::ConnectionLost(_)
                | TransportError::NotConnected(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}
