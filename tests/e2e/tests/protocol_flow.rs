//! Facade-level scenarios: broadcast fan-out, handler failures, expiry and
//! reply correlation, driven end to end through the bus dispatch workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use agent_protocol::{AgentProtocol, MessageHandler, ProtocolError, Recipients};
use bus_core::{BusError, EnvelopeHandler};
use triage_e2e_tests::{content, fast_bus, tagged_envelope};
use types::{Envelope, MessageKind, MessagePriority};

struct Recorder {
    seen: AtomicUsize,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MessageHandler for Recorder {
    async fn on_message(&self, _envelope: &Envelope) -> Result<Value, ProtocolError> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"ack": true}))
    }
}

struct FlakyBusHandler {
    seen: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl EnvelopeHandler for FlakyBusHandler {
    async fn handle(&self, _envelope: Envelope) -> Result<Value, BusError> {
        let n = self.seen.fetch_add(1, Ordering::SeqCst);
        if n == self.fail_on {
            return Err(BusError::Handler("injected failure".to_string()));
        }
        Ok(json!({"ack": n}))
    }
}

#[tokio::test]
async fn broadcast_reaches_exactly_n_minus_one_agents() {
    let bus = fast_bus();
    let a = AgentProtocol::new("a", "responder", bus.clone());
    let _b = AgentProtocol::new("b", "responder", bus.clone());
    let _c = AgentProtocol::new("c", "responder", bus.clone());

    let delivered = a
        .broadcast_message(
            MessageKind::Broadcast,
            content("alert", json!("shelter in place")),
            Recipients::All,
            MessagePriority::Critical,
        )
        .await;

    // Three registered agents including the sender: exactly two deliveries
    assert_eq!(delivered, 2);
    assert!(bus.receive("b").await.is_some());
    assert!(bus.receive("c").await.is_some());
    assert!(bus.receive("a").await.is_none());
}

#[tokio::test]
async fn dispatch_survives_handler_failure() {
    let bus = fast_bus();
    bus.router().register_agent("gamma", "responder");

    let handler = Arc::new(FlakyBusHandler {
        seen: AtomicUsize::new(0),
        fail_on: 0,
    });
    bus.register_handler("gamma", handler.clone());

    for i in 0..3 {
        assert!(bus.send(tagged_envelope("gamma", "alpha", &format!("m{}", i))).await);
    }

    tokio::time::sleep(Duration::from_millis(150)).await;

    // The first invocation failed, but all three envelopes were processed
    assert_eq!(handler.seen.load(Ordering::SeqCst), 3);
    assert_eq!(bus.metrics().handler_errors, 1);
    assert_eq!(bus.queue_len("gamma"), 0);
}

#[tokio::test]
async fn expired_envelope_is_rejected_without_handlers() {
    let bus = fast_bus();
    let beta = AgentProtocol::new("beta", "responder", bus.clone());

    let recorder = Recorder::new();
    beta.register_message_handler(MessageKind::Notification, recorder.clone());

    let envelope = tagged_envelope("beta", "alpha", "stale")
        .with_expiry(chrono::Utc::now() - chrono::Duration::seconds(10));

    let outcome = beta.receive_message(envelope).await;
    assert_eq!(outcome.status.as_str(), "expired");
    assert_eq!(recorder.seen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn request_reply_round_trip_with_correlation() {
    let bus = fast_bus();
    let coordinator = AgentProtocol::new("coordinator", "coordinator", bus.clone());
    let medic = AgentProtocol::new("medic-1", "medic", bus.clone());

    assert!(
        coordinator
            .send_message(
                "medic-1",
                MessageKind::Request,
                content("need", json!("triage count")),
            )
            .await
    );

    let request = bus.receive("medic-1").await.expect("request envelope");
    let outcome = medic.receive_message(request.clone()).await;
    assert_eq!(outcome.status.as_str(), "no_handler");

    assert!(
        medic
            .reply_to_message(&request.message, content("count", json!(12)))
            .await
    );

    let reply = bus.receive("coordinator").await.expect("reply envelope");
    assert_eq!(reply.message.kind, MessageKind::Response);
    assert_eq!(
        reply.message.correlation_id.as_deref(),
        Some(request.message.id.as_str())
    );
    assert_eq!(
        reply.message.reply_to.as_deref(),
        Some(request.message.id.as_str())
    );
    assert_eq!(reply.message.content.get("count"), Some(&json!(12)));
}

#[tokio::test]
async fn topic_subscription_fans_out() {
    let bus = fast_bus();
    let reporter = AgentProtocol::new("reporter", "sensor", bus.clone());
    let watcher_1 = AgentProtocol::new("watcher-1", "observer", bus.clone());
    let watcher_2 = AgentProtocol::new("watcher-2", "observer", bus.clone());

    watcher_1.subscribe_topic("incident.fire");
    watcher_2.subscribe_topic("incident.fire");

    let mut payload = content("topic", json!("incident.fire"));
    payload.insert("severity".to_string(), json!("high"));
    assert!(
        reporter
            .send_message("watcher-1", MessageKind::Notification, payload)
            .await
    );

    // Direct recipient plus the other topic subscriber
    assert!(bus.receive("watcher-1").await.is_some());
    assert!(bus.receive("watcher-2").await.is_some());
    assert!(bus.receive("reporter").await.is_none());
}

#[tokio::test]
async fn full_dispatch_loop_via_registered_handler() {
    let bus = fast_bus();
    bus.start();
    let alpha = AgentProtocol::new("alpha", "coordinator", bus.clone());
    let _beta = AgentProtocol::new("beta", "responder", bus.clone());

    let handled = Arc::new(AtomicUsize::new(0));
    let handled_clone = handled.clone();

    struct CountingBusHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl EnvelopeHandler for CountingBusHandler {
        async fn handle(&self, _envelope: Envelope) -> Result<Value, BusError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"ok": true}))
        }
    }

    bus.register_handler("beta", Arc::new(CountingBusHandler(handled_clone)));

    for _ in 0..5 {
        assert!(
            alpha
                .send_message("beta", MessageKind::Notification, content("ping", json!(1)))
                .await
        );
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handled.load(Ordering::SeqCst), 5);

    bus.shutdown();
}
