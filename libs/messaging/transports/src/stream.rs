//! Streaming transport: duplex TCP with long-lived connections.
//!
//! Frames are `[u32-LE length][JSON payload]`. The first frame on a new
//! connection must be a handshake carrying the connecting agent's id; a
//! connection that sends anything else is answered with a policy-violation
//! frame and closed. Authenticated connections are kept in a table keyed by
//! agent id, and outbound sends write to the matching connection. A write
//! failure removes the dead connection from the table.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use types::{Envelope, TransportKind};

use crate::error::{SendContext, TransportError};
use crate::metadata::{ConnectionState, TransportCounters, TransportMetadata};
use crate::{InboundQueue, Transport};

/// First frame expected on every new connection
#[derive(Debug, Serialize, Deserialize)]
pub struct Handshake {
    pub agent_id: String,
}

/// Configuration for [`StreamTransport`]
#[derive(Debug, Clone)]
pub struct StreamTransportConfig {
    /// Address the duplex server listens on; `None` runs client-only
    pub bind_addr: Option<SocketAddr>,
    /// Upper bound on a single frame
    pub max_frame_bytes: usize,
    /// Bound on the inbound buffer
    pub inbound_capacity: usize,
    /// Per-connection outbound channel depth
    pub channel_capacity: usize,
}

impl Default for StreamTransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: None,
            max_frame_bytes: 1024 * 1024,
            inbound_capacity: 1000,
            channel_capacity: 64,
        }
    }
}

type ConnectionTable = Arc<DashMap<String, mpsc::Sender<Vec<u8>>>>;

/// Duplex streaming delivery channel
pub struct StreamTransport {
    config: StreamTransportConfig,
    /// Authenticated connections keyed by agent id
    connections: ConnectionTable,
    inbound: Arc<InboundQueue>,
    stop: Mutex<Option<CancellationToken>>,
    local_addr: Mutex<Option<SocketAddr>>,
    connected: AtomicBool,
    counters: Arc<TransportCounters>,
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("connections", &self.connections.len())
            .field("bind_addr", &self.config.bind_addr)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl StreamTransport {
    pub fn new(config: StreamTransportConfig) -> Self {
        let inbound = Arc::new(InboundQueue::new(config.inbound_capacity));
        Self {
            config,
            connections: Arc::new(DashMap::new()),
            inbound,
            stop: Mutex::new(None),
            local_addr: Mutex::new(None),
            connected: AtomicBool::new(false),
            counters: Arc::new(TransportCounters::default()),
        }
    }

    /// Address the server actually bound to (set after `connect`)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local addr mutex poisoned")
    }

    /// Number of authenticated connections in the table
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// True when a connection for `agent_id` is in the table
    pub fn has_connection(&self, agent_id: &str) -> bool {
        self.connections.contains_key(agent_id)
    }

    fn stop_token(&self) -> Result<CancellationToken, TransportError> {
        self.stop
            .lock()
            .expect("stop mutex poisoned")
            .as_ref()
            .cloned()
            .ok_or_else(|| {
                TransportError::NotConnected("stream transport not connected".to_string())
            })
    }

    /// Dial a remote duplex server, handshake with our own agent id and
    /// register the connection under `peer_id` so sends addressed to the
    /// peer reach it.
    pub async fn dial(
        &self,
        addr: &str,
        agent_id: &str,
        peer_id: &str,
    ) -> Result<(), TransportError> {
        let stop = self.stop_token()?;

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("dial {}: {}", addr, e)))?;
        let (reader, mut writer) = tokio::io::split(stream);

        let handshake = serde_json::to_vec(&Handshake {
            agent_id: agent_id.to_string(),
        })
        .map_err(types::WireError::from)?;
        write_frame(&mut writer, &handshake).await?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>(self.config.channel_capacity);
        self.connections.insert(peer_id.to_string(), tx);

        tokio::spawn(write_loop(writer, rx, peer_id.to_string()));
        tokio::spawn(read_loop(
            reader,
            peer_id.to_string(),
            self.inbound.clone(),
            self.counters.clone(),
            stop,
            self.config.max_frame_bytes,
        ));

        info!(peer_id, addr, "stream connection dialed");
        Ok(())
    }

    async fn accept_loop(
        listener: TcpListener,
        connections: ConnectionTable,
        inbound: Arc<InboundQueue>,
        counters: Arc<TransportCounters>,
        stop: CancellationToken,
        config: StreamTransportConfig,
    ) {
        info!("stream server accepting connections");
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        debug!(%peer, "stream connection accepted");
                        let connections = connections.clone();
                        let inbound = inbound.clone();
                        let counters = counters.clone();
                        let stop = stop.clone();
                        let config = config.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, connections, inbound, counters, stop, config)
                                .await;
                        });
                    }
                    Err(e) => {
                        warn!("accept failed: {}", e);
                    }
                }
            }
        }
        info!("stream server stopped");
    }
}

/// Serve one accepted connection: handshake, register, then forward frames
/// both ways until either side closes.
async fn handle_connection<S>(
    socket: S,
    connections: ConnectionTable,
    inbound: Arc<InboundQueue>,
    counters: Arc<TransportCounters>,
    stop: CancellationToken,
    config: StreamTransportConfig,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(socket);

    // Handshake: the first frame must identify the connecting agent
    let first = match read_frame(&mut reader, config.max_frame_bytes).await {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            debug!("connection closed before handshake");
            return;
        }
        Err(e) => {
            warn!("handshake read failed: {}", e);
            return;
        }
    };

    let agent_id = match serde_json::from_slice::<Handshake>(&first) {
        Ok(handshake) if !handshake.agent_id.is_empty() => handshake.agent_id,
        _ => {
            warn!("rejecting connection: first frame did not carry an agent id");
            let refusal = serde_json::json!({
                "error": "policy_violation",
                "detail": "first frame must carry the connecting agent id",
            })
            .to_string();
            let _ = write_frame(&mut writer, refusal.as_bytes()).await;
            return;
        }
    };
    info!(%agent_id, "stream connection authenticated");

    let (tx, rx) = mpsc::channel::<Vec<u8>>(config.channel_capacity);
    let tx_for_cleanup = tx.clone();
    if connections.insert(agent_id.clone(), tx).is_some() {
        warn!(%agent_id, "replacing existing stream connection");
    }

    let write_task = tokio::spawn(write_loop(writer, rx, agent_id.clone()));

    read_loop(
        reader,
        agent_id.clone(),
        inbound,
        counters,
        stop,
        config.max_frame_bytes,
    )
    .await;

    // Drop the table entry only if it is still ours (a replacement
    // connection may have taken the key in the meantime)
    let still_ours = connections
        .get(&agent_id)
        .map(|entry| entry.value().same_channel(&tx_for_cleanup))
        .unwrap_or(false);
    if still_ours {
        connections.remove(&agent_id);
    }
    write_task.abort();
    info!(%agent_id, "stream connection closed");
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>, agent_id: String)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            warn!(%agent_id, "stream write failed: {}", e);
            break;
        }
    }
}

async fn read_loop<R>(
    mut reader: R,
    agent_id: String,
    inbound: Arc<InboundQueue>,
    counters: Arc<TransportCounters>,
    stop: CancellationToken,
    max_frame: usize,
) where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            frame = read_frame(&mut reader, max_frame) => match frame {
                Ok(Some(payload)) => match Envelope::from_slice(&payload) {
                    Ok(envelope) => {
                        counters.record_received();
                        inbound.push(envelope);
                    }
                    Err(e) => {
                        warn!(%agent_id, "dropping malformed frame: {}", e);
                    }
                },
                Ok(None) => {
                    debug!(%agent_id, "stream closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(%agent_id, "stream read error: {}", e);
                    break;
                }
            }
        }
    }
}

/// Write one `[u32-LE length][payload]` frame
pub(crate) async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Read one frame; `Ok(None)` signals a clean close at a frame boundary
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    max_frame: usize,
) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > max_frame {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit of {}", len, max_frame),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[async_trait]
impl Transport for StreamTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }

        let stop = CancellationToken::new();

        if let Some(addr) = self.config.bind_addr {
            let listener = TcpListener::bind(addr).await.map_err(|e| {
                TransportError::ConnectionFailed(format!("bind {}: {}", addr, e))
            })?;
            let bound = listener
                .local_addr()
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            *self.local_addr.lock().expect("local addr mutex poisoned") = Some(bound);
            info!(addr = %bound, "stream transport listening");

            tokio::spawn(Self::accept_loop(
                listener,
                self.connections.clone(),
                self.inbound.clone(),
                self.counters.clone(),
                stop.clone(),
                self.config.clone(),
            ));
        }

        *self.stop.lock().expect("stop mutex poisoned") = Some(stop);
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(stop) = self.stop.lock().expect("stop mutex poisoned").take() {
            stop.cancel();
        }
        self.connections.clear();
        *self.local_addr.lock().expect("local addr mutex poisoned") = None;
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected(
                "stream transport not connected".to_string(),
            ));
        }

        let sender = self
            .connections
            .get(&envelope.destination)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                TransportError::NotConnected(format!(
                    "no stream connection for '{}'",
                    envelope.destination
                ))
            })?;

        let destination = envelope.destination.clone();
        let message_id = envelope.message.id.clone();
        let payload = envelope.to_json()?.into_bytes();
        let payload_size = payload.len();

        if sender.send(payload).await.is_err() {
            // Receiver side of the channel is gone: the connection died
            self.connections.remove(&destination);
            self.counters.record_failed();
            return Err(TransportError::send_failed(
                format!("stream connection to '{}' is closed", destination),
                SendContext::new(payload_size)
                    .with_message_id(message_id)
                    .with_destination(destination),
            ));
        }

        self.counters.record_sent();
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Envelope>, TransportError> {
        Ok(self.inbound.pop())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn metadata(&self) -> TransportMetadata {
        let state = if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        let mut metadata = TransportMetadata::new("stream", TransportKind::Stream)
            .with_state(state)
            .with_counters(&self.counters);
        if let Some(addr) = self.local_addr() {
            metadata = metadata.with_endpoint(format!("tcp://{}", addr));
        }
        metadata
    }
}
