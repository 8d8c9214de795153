//! Push transport: request/response delivery over HTTP.
//!
//! Outbound sends POST the JSON envelope to the endpoint registered for the
//! destination. Inbound delivery is served by an embedded listener that
//! accepts `POST /envelope`, deserializes the body and buffers the envelope
//! for the bus — a 2xx response means "accepted into the receiver's queue",
//! not "handled". Malformed bodies are rejected with 400 and never silently
//! swallowed.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use types::{Envelope, TransportKind};

use crate::error::{SendContext, TransportError};
use crate::metadata::{ConnectionState, TransportCounters, TransportMetadata};
use crate::{InboundQueue, Transport};

/// Path the listener accepts envelopes on
pub const ENVELOPE_PATH: &str = "/envelope";

/// Configuration for [`PushTransport`]
#[derive(Debug, Clone)]
pub struct PushTransportConfig {
    /// Address for the inbound listener; `None` runs outbound-only
    pub bind_addr: Option<SocketAddr>,
    /// Outbound request timeout
    pub request_timeout_ms: u64,
    /// Bound on the inbound buffer
    pub inbound_capacity: usize,
}

impl Default for PushTransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: None,
            request_timeout_ms: 5000,
            inbound_capacity: 1000,
        }
    }
}

/// HTTP push delivery channel
pub struct PushTransport {
    config: PushTransportConfig,
    client: reqwest::Client,
    /// Destination name → endpoint URL
    endpoints: DashMap<String, String>,
    inbound: Arc<InboundQueue>,
    listener_stop: Mutex<Option<CancellationToken>>,
    local_addr: Mutex<Option<SocketAddr>>,
    connected: AtomicBool,
    counters: TransportCounters,
}

impl std::fmt::Debug for PushTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushTransport")
            .field("endpoints", &self.endpoints.len())
            .field("bind_addr", &self.config.bind_addr)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl PushTransport {
    pub fn new(config: PushTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| TransportError::InvalidConfig(format!("http client: {}", e)))?;

        let inbound = Arc::new(InboundQueue::new(config.inbound_capacity));
        Ok(Self {
            config,
            client,
            endpoints: DashMap::new(),
            inbound,
            listener_stop: Mutex::new(None),
            local_addr: Mutex::new(None),
            connected: AtomicBool::new(false),
            counters: TransportCounters::default(),
        })
    }

    /// Register the endpoint URL envelopes for `destination` are POSTed to
    pub fn set_endpoint(&self, destination: &str, url: impl Into<String>) {
        self.endpoints.insert(destination.to_string(), url.into());
    }

    /// Remove the endpoint for `destination`; returns `false` when absent
    pub fn remove_endpoint(&self, destination: &str) -> bool {
        self.endpoints.remove(destination).is_some()
    }

    /// Address the listener actually bound to (set after `connect`)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local addr mutex poisoned")
    }

    fn start_listener(&self, addr: SocketAddr) -> Result<(), TransportError> {
        let inbound = self.inbound.clone();
        let make_svc = make_service_fn(move |_conn| {
            let inbound = inbound.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    serve_envelope(req, inbound.clone())
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .map_err(|e| TransportError::ConnectionFailed(format!("bind {}: {}", addr, e)))?
            .serve(make_svc);

        let bound = server.local_addr();
        *self.local_addr.lock().expect("local addr mutex poisoned") = Some(bound);

        let stop = CancellationToken::new();
        let shutdown = stop.clone();
        let graceful = server.with_graceful_shutdown(async move { shutdown.cancelled().await });
        tokio::spawn(async move {
            if let Err(e) = graceful.await {
                error!("push listener error: {}", e);
            }
        });

        *self
            .listener_stop
            .lock()
            .expect("listener stop mutex poisoned") = Some(stop);
        info!(addr = %bound, "push transport listening");
        Ok(())
    }
}

async fn serve_envelope(
    req: Request<Body>,
    inbound: Arc<InboundQueue>,
) -> Result<Response<Body>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, ENVELOPE_PATH) => {
            let body = match hyper::body::to_bytes(req.into_body()).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Ok(error_response(
                        StatusCode::BAD_REQUEST,
                        &format!("unreadable body: {}", e),
                    ))
                }
            };
            match Envelope::from_slice(&body) {
                Ok(envelope) => {
                    debug!(
                        message_id = %envelope.message.id,
                        destination = %envelope.destination,
                        "push listener accepted envelope"
                    );
                    inbound.push(envelope);
                    Ok(json_response(
                        StatusCode::ACCEPTED,
                        "{\"status\":\"accepted\"}",
                    ))
                }
                Err(e) => {
                    warn!("push listener rejected malformed envelope: {}", e);
                    Ok(error_response(StatusCode::BAD_REQUEST, &e.to_string()))
                }
            }
        }
        _ => Ok(error_response(StatusCode::NOT_FOUND, "not found")),
    }
}

fn json_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

fn error_response(status: StatusCode, detail: &str) -> Response<Body> {
    let body = serde_json::json!({ "error": detail }).to_string();
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

#[async_trait]
impl Transport for PushTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }
        if let Some(addr) = self.config.bind_addr {
            self.start_listener(addr)?;
        }
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(stop) = self
            .listener_stop
            .lock()
            .expect("listener stop mutex poisoned")
            .take()
        {
            stop.cancel();
        }
        *self.local_addr.lock().expect("local addr mutex poisoned") = None;
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected(
                "push transport not connected".to_string(),
            ));
        }

        let url = self
            .endpoints
            .get(&envelope.destination)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                TransportError::InvalidConfig(format!(
                    "no endpoint registered for '{}'",
                    envelope.destination
                ))
            })?;

        let message_id = envelope.message.id.clone();
        let destination = envelope.destination.clone();

        let response = self
            .client
            .post(url.as_str())
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                self.counters.record_failed();
                TransportError::send_failed(
                    format!("POST {} failed: {}", url, e),
                    SendContext::new(0)
                        .with_message_id(message_id.clone())
                        .with_destination(destination.clone()),
                )
            })?;

        if response.status().is_success() {
            self.counters.record_sent();
            debug!(%message_id, %destination, "envelope accepted by push endpoint");
            Ok(())
        } else {
            self.counters.record_failed();
            Err(TransportError::send_failed(
                format!("endpoint returned {}", response.status()),
                SendContext::new(0)
                    .with_message_id(message_id)
                    .with_destination(destination),
            ))
        }
    }

    async fn receive(&self) -> Result<Option<Envelope>, TransportError> {
        let envelope = self.inbound.pop();
        if envelope.is_some() {
            self.counters.record_received();
        }
        Ok(envelope)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Push
    }

    fn metadata(&self) -> TransportMetadata {
        let state = if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        let mut metadata = TransportMetadata::new("push", TransportKind::Push)
            .with_state(state)
            .with_counters(&self.counters);
        if let Some(addr) = self.local_addr() {
            metadata = metadata.with_endpoint(format!("http://{}{}", addr, ENVELOPE_PATH));
        }
        metadata
    }
}
