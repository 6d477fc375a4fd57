//! Shared helpers for the integration tests.
#![allow(dead_code)] // not every test binary uses every helper

use std::sync::{Arc, Mutex, PoisonError};

use subwire::{
    client::{ClientConfig, SubscriptionClient},
    protocol::{EventPayload, Message},
};
use subwire_testing::{MemoryConnector, MemoryTransport};
use tokio::sync::mpsc::UnboundedReceiver;

/// Payloads delivered to one subscription callback.
pub type Captured = Arc<Mutex<Vec<EventPayload>>>;

/// A result callback that captures every delivered payload.
pub fn capture() -> (impl FnMut(EventPayload) + Send + 'static, Captured) {
    let events: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (
        move |payload| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(payload);
        },
        events,
    )
}

/// Snapshot of what a [`capture`] callback received so far.
pub fn payloads(captured: &Captured) -> Vec<EventPayload> {
    captured
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Connection-callback outcomes, errors stringified for assertions.
pub type Outcomes = Arc<Mutex<Vec<Result<(), String>>>>;

/// A config whose connection callback records every outcome.
pub fn recording_config() -> (ClientConfig, Outcomes) {
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);
    let config = ClientConfig::default().connection_callback(move |outcome| {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome.map_err(|err| err.to_string()));
    });
    (config, outcomes)
}

/// Snapshot of recorded connection outcomes.
pub fn outcomes(recorded: &Outcomes) -> Vec<Result<(), String>> {
    recorded
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Spin up a client against a hand-driven server end.
///
/// Returns the first accepted server end plus the receiver yielding ends
/// for later reconnection attempts.
pub async fn raw_client(
    config: ClientConfig,
) -> (
    SubscriptionClient,
    MemoryTransport,
    MemoryConnector,
    UnboundedReceiver<MemoryTransport>,
) {
    let (connector, mut ends) = MemoryConnector::new();
    let client = SubscriptionClient::connect(connector.clone(), config);
    let server = ends.recv().await.expect("client connected");
    (client, server, connector, ends)
}

/// Read the next frame, asserting it is `init`, and return its payload.
pub async fn expect_init(server: &mut MemoryTransport) -> Option<serde_json::Value> {
    match server.recv_message().await.expect("expected a frame") {
        Message::Init { payload } => payload,
        other => panic!("expected init, got {}", other.kind()),
    }
}

/// Complete the handshake: consume `init`, reply `init_success`.
pub async fn accept_handshake(server: &mut MemoryTransport) {
    expect_init(server).await;
    server.send_message(&Message::InitSuccess);
}
