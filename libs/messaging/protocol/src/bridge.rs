//! Wiring between transports and the bus.
//!
//! Transports deliver inbound envelopes as raw [`types::Envelope`] values;
//! the pieces here hand them to the bus. [`BusForwarder`] adapts the bus to
//! the transport-side [`LocalHandler`] contract, and [`spawn_inbound_pump`]
//! drains a connected transport's inbound buffer into the bus on a poll
//! cadence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bus_core::MessageBus;
use message_transport::{LocalHandler, SendContext, Transport, TransportError};
use types::Envelope;

/// Adapts the bus to the transport [`LocalHandler`] contract
pub struct BusForwarder {
    bus: MessageBus,
}

impl BusForwarder {
    pub fn new(bus: MessageBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl LocalHandler for BusForwarder {
    async fn handle(&self, envelope: Envelope) -> Result<(), TransportError> {
        let message_id = envelope.message.id.clone();
        let destination = envelope.destination.clone();
        if self.bus.send(envelope).await {
            Ok(())
        } else {
            Err(TransportError::send_failed(
                "bus rejected envelope",
                SendContext::new(0)
                    .with_message_id(message_id)
                    .with_destination(destination),
            ))
        }
    }
}

/// Drain a transport's inbound buffer into the bus until cancelled.
///
/// Returns the stop token controlling the pump task.
pub fn spawn_inbound_pump(
    transport: Arc<dyn Transport>,
    bus: MessageBus,
    poll_ms: u64,
) -> CancellationToken {
    let stop = CancellationToken::new();
    let task_stop = stop.clone();

    tokio::spawn(async move {
        debug!("inbound pump started");
        let mut tick = tokio::time::interval(Duration::from_millis(poll_ms.max(1)));
        loop {
            tokio::select! {
                _ = task_stop.cancelled() => break,
                _ = tick.tick() => {
                    loop {
                        match transport.receive().await {
                            Ok(Some(envelope)) => {
                                let message_id = envelope.message.id.clone();
                                if !bus.send(envelope).await {
                                    warn!(%message_id, "bus rejected inbound envelope");
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!("inbound receive failed: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        }
        debug!("inbound pump stopped");
    });

    stop
}
