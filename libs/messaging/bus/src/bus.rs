//! # Message Bus - Delivery Coordinator
//!
//! ## Purpose
//! Accepts envelopes, resolves recipients through the [`Router`], enqueues a
//! per-recipient clone onto each destination's bounded queue, and drives
//! delivery through per-destination dispatch workers plus periodic cleanup
//! and retry loops.
//!
//! ## Architecture Role
//! ```text
//! Facade → Bus::send → Router::route_message → DestinationQueue::put
//!                                                    ↓
//!                         dispatch worker ← Queue::get → EnvelopeHandler
//! ```
//!
//! Failed sends land in the [`RetryQueue`] and are re-attempted by the retry
//! loop until their budget is exhausted. Delivery ordering is FIFO per
//! destination for envelopes accepted without retry; a retried envelope
//! re-enters `send` and may queue behind newer traffic.
//!
//! ## Concurrency
//! The duplicate check, routing and enqueueing run under a single lock so a
//! concurrent resend of the same message id cannot double-deliver. Every
//! background worker owns a child [`CancellationToken`] of the bus's
//! shutdown token; `shutdown()` cancels the root and each loop exits at its
//! next wakeup without aborting in-flight sends.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use types::Envelope;

use crate::config::BusConfig;
use crate::metrics::{BusMetrics, BusMetricsSnapshot};
use crate::queue::DestinationQueue;
use crate::retry::RetryQueue;
use crate::router::Router;
use crate::BusError;

/// Caller-registered delivery callback for one destination.
///
/// A returned error is caught and logged by the dispatch worker; it never
/// stops delivery for other destinations or later envelopes.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> Result<Value, BusError>;
}

/// Mutable state guarded by the bus lock
struct BusState {
    /// Message ids that reached every resolved recipient
    delivered: HashSet<String>,
    /// Bounded ring of accepted envelopes, for diagnostics
    history: VecDeque<Envelope>,
}

struct HandlerEntry {
    stop: CancellationToken,
}

struct BusInner {
    config: BusConfig,
    router: Router,
    queues: DashMap<String, Arc<DestinationQueue>>,
    handlers: DashMap<String, HandlerEntry>,
    state: Mutex<BusState>,
    failed: RetryQueue,
    metrics: BusMetrics,
    shutdown: CancellationToken,
    started: AtomicBool,
}

/// Cloneable handle to the bus; all clones share the same state.
///
/// Constructed explicitly and passed by reference to every component that
/// needs it — there is no global instance, so tests can run isolated buses
/// side by side.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                router: Router::new(),
                queues: DashMap::new(),
                handlers: DashMap::new(),
                state: Mutex::new(BusState {
                    delivered: HashSet::new(),
                    history: VecDeque::new(),
                }),
                failed: RetryQueue::new(),
                metrics: BusMetrics::new(),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Routing tables and agent directory
    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// Active configuration
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Snapshot of delivery counters
    pub fn metrics(&self) -> BusMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Start the cleanup and retry loops. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("message bus starting");

        let bus = self.clone();
        let stop = self.inner.shutdown.child_token();
        tokio::spawn(async move { bus.cleanup_loop(stop).await });

        let bus = self.clone();
        let stop = self.inner.shutdown.child_token();
        tokio::spawn(async move { bus.retry_loop(stop).await });
    }

    /// Flip the shutdown token; every worker exits at its next wakeup.
    /// In-flight sends are not aborted.
    pub fn shutdown(&self) {
        info!("message bus shutting down");
        self.inner.shutdown.cancel();
    }

    /// True once `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn queue_for(&self, destination: &str) -> Arc<DestinationQueue> {
        self.inner
            .queues
            .entry(destination.to_string())
            .or_insert_with(|| Arc::new(DestinationQueue::new(self.inner.config.queue_capacity)))
            .clone()
    }

    /// Queued envelope count for one destination
    pub fn queue_len(&self, destination: &str) -> usize {
        self.inner
            .queues
            .get(destination)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    /// Total envelopes queued across all destinations
    pub fn total_queued(&self) -> usize {
        self.inner.queues.iter().map(|entry| entry.value().len()).sum()
    }

    /// Envelopes currently awaiting retry
    pub fn retry_backlog(&self) -> usize {
        self.inner.failed.len()
    }

    /// Entries currently retained in the delivery history ring
    pub async fn history_len(&self) -> usize {
        self.inner.state.lock().await.history.len()
    }

    /// True when the message id has reached every resolved recipient
    pub async fn was_delivered(&self, message_id: &str) -> bool {
        self.inner.state.lock().await.delivered.contains(message_id)
    }

    /// Submit an envelope for delivery.
    ///
    /// Returns `true` when the envelope was enqueued for every resolved
    /// recipient (or the message id was already delivered — idempotent
    /// resend). Returns `false` on routing failure (nothing queued, not
    /// retried) or incomplete delivery (queued for retry while budget
    /// remains). Delivery-path failures never surface as errors.
    pub async fn send(&self, envelope: Envelope) -> bool {
        if self.inner.shutdown.is_cancelled() {
            warn!(
                message_id = %envelope.message.id,
                "send rejected, bus is shut down"
            );
            return false;
        }
        self.inner.metrics.record_sent();

        // Dedup check, routing and enqueueing form one critical section so a
        // concurrent resend of the same message id cannot double-deliver.
        let mut state = self.inner.state.lock().await;

        if state.delivered.contains(&envelope.message.id) {
            self.inner.metrics.record_duplicate();
            debug!(
                message_id = %envelope.message.id,
                "message already delivered, short-circuiting resend"
            );
            return true;
        }

        let recipients = self.inner.router.route_message(&envelope);
        if recipients.is_empty() {
            self.inner.metrics.record_routing_failure();
            warn!(
                destination = %envelope.destination,
                message_id = %envelope.message.id,
                "no recipients resolved, dropping send"
            );
            return false;
        }

        let mut enqueued = 0usize;
        let mut failed_recipients: Vec<String> = Vec::new();
        for recipient in &recipients {
            let queue = self.queue_for(recipient);
            if queue.put(envelope.for_recipient(recipient)) {
                enqueued += 1;
            } else {
                failed_recipients.push(recipient.clone());
            }
        }

        state.history.push_back(envelope.clone());
        while state.history.len() > self.inner.config.history_capacity {
            state.history.pop_front();
        }

        if enqueued == recipients.len() {
            state.delivered.insert(envelope.message.id.clone());
            self.inner.metrics.record_delivered();
            debug!(
                message_id = %envelope.message.id,
                recipients = recipients.len(),
                "envelope delivered to all recipient queues"
            );
            true
        } else {
            if enqueued > 0 {
                self.inner.metrics.record_partial_delivery();
            }
            warn!(
                message_id = %envelope.message.id,
                delivered = enqueued,
                total = recipients.len(),
                failed = ?failed_recipients,
                "incomplete delivery, queueing for retry"
            );
            drop(state);
            if !self.inner.failed.push(envelope) {
                self.inner.metrics.record_retry_exhausted();
            }
            false
        }
    }

    /// Pull the next envelope addressed to `destination`.
    ///
    /// Polls up to `receive_poll_ms` and returns `None` rather than blocking
    /// indefinitely. Expired envelopes are discarded here without invoking
    /// any handler.
    pub async fn receive(&self, destination: &str) -> Option<Envelope> {
        let poll_bound = Duration::from_millis(self.inner.config.receive_poll_ms);
        let deadline = tokio::time::Instant::now() + poll_bound;
        let step = Duration::from_millis(self.inner.config.receive_poll_ms.min(5).max(1));

        loop {
            if let Some(queue) = self.inner.queues.get(destination) {
                while let Some(envelope) = queue.get() {
                    if envelope.is_expired() {
                        self.inner.metrics.record_expired();
                        debug!(
                            message_id = %envelope.message.id,
                            destination,
                            "discarding expired envelope at receive"
                        );
                        continue;
                    }
                    return Some(envelope);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(step).await;
        }
    }

    /// Register a delivery handler for `destination` and spawn its dispatch
    /// worker. Replaces (and stops) any previous worker for the destination.
    pub fn register_handler(&self, destination: &str, handler: Arc<dyn EnvelopeHandler>) {
        self.unregister_handler(destination);

        let stop = self.inner.shutdown.child_token();
        self.inner
            .handlers
            .insert(destination.to_string(), HandlerEntry { stop: stop.clone() });

        let bus = self.clone();
        let destination = destination.to_string();
        tokio::spawn(async move { bus.dispatch_worker(destination, handler, stop).await });
    }

    /// Stop and remove the dispatch worker for `destination`.
    /// Returns `false` when no handler was registered.
    pub fn unregister_handler(&self, destination: &str) -> bool {
        match self.inner.handlers.remove(destination) {
            Some((_, entry)) => {
                entry.stop.cancel();
                true
            }
            None => false,
        }
    }

    /// True when a handler is registered for `destination`
    pub fn has_handler(&self, destination: &str) -> bool {
        self.inner.handlers.contains_key(destination)
    }

    async fn dispatch_worker(
        &self,
        destination: String,
        handler: Arc<dyn EnvelopeHandler>,
        stop: CancellationToken,
    ) {
        debug!(%destination, "dispatch worker started");
        let queue = self.queue_for(&destination);
        let mut tick =
            tokio::time::interval(Duration::from_millis(self.inner.config.dispatch_interval_ms));

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tick.tick() => {
                    while let Some(envelope) = queue.get() {
                        if envelope.is_expired() {
                            self.inner.metrics.record_expired();
                            debug!(
                                message_id = %envelope.message.id,
                                %destination,
                                "discarding expired envelope before dispatch"
                            );
                            continue;
                        }
                        let message_id = envelope.message.id.clone();
                        if let Err(e) = handler.handle(envelope).await {
                            // The worker keeps draining; one bad envelope or
                            // handler must not stall the destination.
                            self.inner.metrics.record_handler_error();
                            error!(
                                %destination,
                                %message_id,
                                error = %e,
                                "handler failed"
                            );
                        }
                    }
                }
            }
        }
        debug!(%destination, "dispatch worker stopped");
    }

    async fn cleanup_loop(self, stop: CancellationToken) {
        let mut tick =
            tokio::time::interval(Duration::from_millis(self.inner.config.cleanup_interval_ms));
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tick.tick() => {
                    let mut state = self.inner.state.lock().await;
                    let cap = self.inner.config.history_capacity;
                    let excess = state.history.len().saturating_sub(cap);
                    for _ in 0..excess {
                        state.history.pop_front();
                    }
                    if excess > 0 {
                        debug!(trimmed = excess, "history trimmed");
                    }
                }
            }
        }
    }

    async fn retry_loop(self, stop: CancellationToken) {
        let mut tick =
            tokio::time::interval(Duration::from_millis(self.inner.config.retry_interval_ms));
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tick.tick() => {
                    self.retry_cycle().await;
                }
            }
        }
    }

    /// One pass over the failed list: re-attempt every envelope that still
    /// has budget, incrementing its retry count per attempt. A failed
    /// re-send re-enters the list through `send`; an exhausted envelope is
    /// dropped there and never retried again.
    async fn retry_cycle(&self) {
        let due = self.inner.failed.take_all();
        for mut envelope in due {
            envelope.retry_count += 1;
            self.inner.metrics.record_retry_attempt();
            debug!(
                message_id = %envelope.message.id,
                attempt = envelope.retry_count,
                max_retries = envelope.max_retries,
                "retrying delivery"
            );
            self.send(envelope).await;
        }
    }
}
