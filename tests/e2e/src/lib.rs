//! Shared fixtures for the end-to-end scenario tests.

use serde_json::{Map, Value};

use bus_core::{BusConfig, MessageBus};
use types::{Envelope, Message, MessageKind, ProtocolKind, TransportKind};

/// Bus tuned for fast test cycles
pub fn fast_bus() -> MessageBus {
    MessageBus::new(BusConfig {
        dispatch_interval_ms: 5,
        retry_interval_ms: 20,
        receive_poll_ms: 20,
        ..BusConfig::default()
    })
}

/// Single-entry content map
pub fn content(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

/// Notification envelope from `source` to `destination` with a `tag` content
/// key for assertions
pub fn tagged_envelope(destination: &str, source: &str, tag: &str) -> Envelope {
    let message = Message::new(
        MessageKind::Notification,
        source,
        destination,
        content("tag", Value::from(tag)),
    );
    Envelope::new(
        ProtocolKind::Agent,
        TransportKind::InProcess,
        destination,
        source,
        message,
    )
}

/// Read back the `tag` content key
pub fn tag_of(envelope: &Envelope) -> String {
    envelope
        .message
        .content
        .get("tag")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
