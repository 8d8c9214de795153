//! Bus delivery pipeline scenarios: routing failures, ordering, idempotent
//! resends, retry budgets and queue bounds.

use bus_core::{BusConfig, MessageBus};
use serde_json::json;
use std::time::Duration;
use triage_e2e_tests::{content, fast_bus, tag_of, tagged_envelope};
use types::MessageKind;

use agent_protocol::AgentProtocol;

#[tokio::test]
async fn unrouted_destination_fails_without_queueing() {
    let bus = fast_bus();

    // No route exists for "alpha": the send fails and nothing is queued
    let accepted = bus.send(tagged_envelope("alpha", "zeta", "m1")).await;

    assert!(!accepted);
    assert_eq!(bus.total_queued(), 0);
    assert_eq!(bus.retry_backlog(), 0);
    assert_eq!(bus.metrics().routing_failures, 1);
}

#[tokio::test]
async fn sequential_sends_preserve_fifo_order() {
    let bus = fast_bus();
    bus.router().register_agent("beta", "responder");

    assert!(bus.send(tagged_envelope("beta", "alpha", "hello")).await);
    assert!(bus.send(tagged_envelope("beta", "alpha", "world")).await);

    let first = bus.receive("beta").await.expect("first envelope");
    let second = bus.receive("beta").await.expect("second envelope");
    assert_eq!(tag_of(&first), "hello");
    assert_eq!(tag_of(&second), "world");
}

#[tokio::test]
async fn submission_order_is_preserved_under_load() {
    let bus = fast_bus();
    bus.router().register_agent("beta", "responder");

    for i in 0..100 {
        assert!(
            bus.send(tagged_envelope("beta", "alpha", &format!("m{:03}", i)))
                .await
        );
    }
    for i in 0..100 {
        let envelope = bus.receive("beta").await.expect("queued envelope");
        assert_eq!(tag_of(&envelope), format!("m{:03}", i));
    }
}

#[tokio::test]
async fn delivered_message_id_is_never_requeued() {
    let bus = fast_bus();
    bus.router().register_agent("beta", "responder");

    let envelope = tagged_envelope("beta", "alpha", "only-once");
    assert!(bus.send(envelope.clone()).await);
    assert!(bus.was_delivered(&envelope.message.id).await);

    // Later sends carrying the same message id short-circuit
    assert!(bus.send(envelope.clone()).await);
    assert!(bus.send(envelope).await);

    assert_eq!(bus.queue_len("beta"), 1);
    assert_eq!(bus.metrics().duplicate_sends, 2);
}

#[tokio::test]
async fn retry_budget_is_exhausted_then_dropped() {
    // Zero-capacity queues reject every put, modeling a dead destination
    let bus = MessageBus::new(BusConfig {
        queue_capacity: 0,
        dispatch_interval_ms: 5,
        retry_interval_ms: 25,
        receive_poll_ms: 20,
        ..BusConfig::default()
    });
    bus.router().register_agent("dead", "responder");
    bus.start();

    let envelope = tagged_envelope("dead", "alpha", "doomed").with_max_retries(2);
    assert!(!bus.send(envelope).await);
    assert_eq!(bus.retry_backlog(), 1);

    // Let the retry loop run both budgeted attempts and give up
    tokio::time::sleep(Duration::from_millis(200)).await;

    let metrics = bus.metrics();
    assert_eq!(metrics.retries_attempted, 2);
    assert_eq!(metrics.retry_exhausted, 1);
    assert_eq!(bus.retry_backlog(), 0);

    bus.shutdown();
}

#[tokio::test]
async fn queue_capacity_bound_holds_with_drop_oldest() {
    let bus = MessageBus::new(BusConfig {
        queue_capacity: 5,
        dispatch_interval_ms: 5,
        retry_interval_ms: 20,
        receive_poll_ms: 20,
        ..BusConfig::default()
    });
    bus.router().register_agent("beta", "responder");

    for i in 0..20 {
        assert!(bus.send(tagged_envelope("beta", "alpha", &format!("m{}", i))).await);
        assert!(bus.queue_len("beta") <= 5);
    }

    // The survivors are the newest five, still in FIFO order
    let mut tags = Vec::new();
    while let Some(envelope) = bus.receive("beta").await {
        tags.push(tag_of(&envelope));
    }
    assert_eq!(tags, vec!["m15", "m16", "m17", "m18", "m19"]);
}

#[tokio::test]
async fn facade_send_flows_through_bus() {
    let bus = fast_bus();
    let alpha = AgentProtocol::new("alpha", "coordinator", bus.clone());
    let _beta = AgentProtocol::new("beta", "responder", bus.clone());

    assert!(
        alpha
            .send_message("beta", MessageKind::Request, content("q", json!("status")))
            .await
    );

    let envelope = bus.receive("beta").await.expect("delivered envelope");
    assert_eq!(envelope.source, "alpha");
    assert_eq!(envelope.message.sender_id, "alpha");
    assert_eq!(envelope.message.receiver_id, "beta");
}
