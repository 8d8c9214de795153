//! Transport scenarios: HTTP push round trips, stream handshakes and
//! pub/sub wildcard listening, wired into the bus through the inbound pump.

use std::sync::Arc;
use std::time::Duration;

use agent_protocol::spawn_inbound_pump;
use message_transport::{
    agent_channel, PubSubBroker, PubSubTransport, PushTransport, PushTransportConfig,
    StreamTransport, StreamTransportConfig, Transport, TransportManager,
};
use triage_e2e_tests::{fast_bus, tag_of, tagged_envelope};
use types::TransportKind;

#[tokio::test]
async fn push_round_trip_lands_on_the_bus() {
    let bus = fast_bus();
    bus.router().register_agent("beta", "responder");

    // Receiver side: listener plus a pump into the bus
    let receiver = Arc::new(
        PushTransport::new(PushTransportConfig {
            bind_addr: Some("127.0.0.1:0".parse().unwrap()),
            ..PushTransportConfig::default()
        })
        .unwrap(),
    );
    receiver.connect().await.unwrap();
    let addr = receiver.local_addr().expect("listener bound");
    let pump = spawn_inbound_pump(receiver.clone(), bus.clone(), 5);

    // Sender side: outbound-only client
    let sender = PushTransport::new(PushTransportConfig::default()).unwrap();
    sender.connect().await.unwrap();
    sender.set_endpoint("beta", format!("http://{}/envelope", addr));

    sender
        .send(tagged_envelope("beta", "alpha", "over-http"))
        .await
        .unwrap();

    let envelope = bus.receive("beta").await.expect("envelope delivered to bus");
    assert_eq!(tag_of(&envelope), "over-http");

    pump.cancel();
    sender.disconnect().await.unwrap();
    receiver.disconnect().await.unwrap();
}

#[tokio::test]
async fn push_listener_rejects_garbage_with_400() {
    let receiver = PushTransport::new(PushTransportConfig {
        bind_addr: Some("127.0.0.1:0".parse().unwrap()),
        ..PushTransportConfig::default()
    })
    .unwrap();
    receiver.connect().await.unwrap();
    let addr = receiver.local_addr().expect("listener bound");

    let response = reqwest::Client::new()
        .post(format!("http://{}/envelope", addr))
        .body("{\"definitely\": \"not an envelope\"}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    assert!(receiver.receive().await.unwrap().is_none());

    receiver.disconnect().await.unwrap();
}

#[tokio::test]
async fn stream_clients_exchange_envelopes_through_server() {
    let server = Arc::new(StreamTransport::new(StreamTransportConfig {
        bind_addr: Some("127.0.0.1:0".parse().unwrap()),
        ..StreamTransportConfig::default()
    }));
    server.connect().await.unwrap();
    let addr = server.local_addr().expect("server bound");

    // A client dials in and authenticates as "beta"
    let client = StreamTransport::new(StreamTransportConfig::default());
    client.connect().await.unwrap();
    client
        .dial(&addr.to_string(), "beta", "server")
        .await
        .unwrap();

    // Wait for the server to register the authenticated connection
    for _ in 0..100 {
        if server.has_connection("beta") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(server.has_connection("beta"));

    // Server writes to the matching connection; the client reads it
    server
        .send(tagged_envelope("beta", "dispatch", "stream-bound"))
        .await
        .unwrap();

    let mut received = None;
    for _ in 0..100 {
        if let Some(envelope) = client.receive().await.unwrap() {
            received = Some(envelope);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let envelope = received.expect("envelope over the stream");
    assert_eq!(tag_of(&envelope), "stream-bound");

    client.disconnect().await.unwrap();
    server.disconnect().await.unwrap();
}

#[tokio::test]
async fn pubsub_wildcard_listener_feeds_the_bus() {
    let bus = fast_bus();
    bus.router().register_agent("beta", "responder");

    let broker = PubSubBroker::default();

    let listener = Arc::new(PubSubTransport::new(broker.clone(), 100));
    listener.register_destination("beta");
    listener.connect().await.unwrap();
    let pump = spawn_inbound_pump(listener.clone(), bus.clone(), 5);

    let publisher = PubSubTransport::new(broker.clone(), 100);
    publisher.connect().await.unwrap();

    // Channel naming follows the agent:{destination} convention
    assert_eq!(agent_channel("beta"), "agent:beta");
    publisher
        .send(tagged_envelope("beta", "alpha", "published"))
        .await
        .unwrap();

    let envelope = bus.receive("beta").await.expect("published envelope on bus");
    assert_eq!(tag_of(&envelope), "published");

    pump.cancel();
    publisher.disconnect().await.unwrap();
    listener.disconnect().await.unwrap();
}

#[tokio::test]
async fn manager_routes_outbound_through_active_transport() {
    let manager = TransportManager::new();

    let broker = PubSubBroker::default();
    let pubsub = Arc::new(PubSubTransport::new(broker.clone(), 100));
    pubsub.register_destination("beta");

    let inprocess = Arc::new(message_transport::InProcessTransport::default());

    manager.register(inprocess.clone());
    manager.register(pubsub.clone());
    assert_eq!(manager.connect_all().await, 2);

    // In-process was registered first and is active by default
    assert_eq!(manager.active_kind(), Some(TransportKind::InProcess));
    manager
        .send(tagged_envelope("beta", "alpha", "via-inprocess"))
        .await
        .unwrap();
    assert_eq!(inprocess.queued(), 1);

    // Switch the active outbound channel to pub/sub
    manager.set_active(TransportKind::PubSub).unwrap();
    manager
        .send(tagged_envelope("beta", "alpha", "via-pubsub"))
        .await
        .unwrap();

    let mut received = None;
    for _ in 0..100 {
        if let Some(envelope) = pubsub.receive().await.unwrap() {
            received = Some(envelope);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(tag_of(&received.expect("pub/sub delivery")), "via-pubsub");

    assert_eq!(manager.disconnect_all().await, 2);
}
