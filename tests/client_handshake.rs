//! Handshake behavior: init payload, acknowledgment, rejection, and fatal
//! protocol violations.

mod common;

use serde_json::json;
use subwire::{
    ClientConfig, ClientError, ClientState, Message, SubscriptionClient, SubscriptionRequest,
    protocol::{InitFailPayload, close_code},
};
use subwire_testing::{MemoryConnector, settle};

use common::{capture, expect_init, outcomes, raw_client, recording_config};

#[tokio::test(start_paused = true)]
async fn init_carries_the_connection_params() {
    let config = ClientConfig::default().connection_params(json!({"token": "abc"}));
    let (_client, mut server, _connector, _ends) = raw_client(config).await;

    let payload = expect_init(&mut server).await;
    assert_eq!(payload, Some(json!({"token": "abc"})));
}

#[tokio::test(start_paused = true)]
async fn accepted_handshake_reports_ok() {
    let (config, recorded) = recording_config();
    let (client, mut server, _connector, _ends) = raw_client(config).await;

    common::accept_handshake(&mut server).await;
    settle().await;

    assert_eq!(client.state(), ClientState::Ready);
    assert_eq!(outcomes(&recorded), vec![Ok(())]);
}

#[tokio::test(start_paused = true)]
async fn rejected_handshake_is_fatal_and_never_retried() {
    let (config, recorded) = recording_config();
    let config = config.reconnect(true);
    let (client, mut server, connector, _ends) = raw_client(config).await;

    expect_init(&mut server).await;
    server.send_message(&Message::InitFail {
        payload: InitFailPayload {
            error: "test error".to_owned(),
        },
    });
    settle().await;

    assert_eq!(
        outcomes(&recorded),
        vec![Err("handshake rejected: test error".to_owned())]
    );
    assert_eq!(client.state(), ClientState::Closed);
    // Reconnection is enabled, yet rejection must not trigger it.
    assert_eq!(connector.attempts(), 1);

    let (sink, _) = capture();
    let err = client
        .subscribe(SubscriptionRequest::new("subscription { a }"), sink)
        .expect_err("client is closed");
    assert!(matches!(err, ClientError::Closed));
}

#[tokio::test(start_paused = true)]
async fn failed_subprotocol_negotiation_surfaces_a_connect_error() {
    let (config, recorded) = recording_config();
    let (connector, _ends) = MemoryConnector::new();
    connector.reject_protocol(close_code::PROTOCOL_ERROR);

    let client = SubscriptionClient::connect(connector.clone(), config);
    settle().await;

    assert_eq!(client.state(), ClientState::Closed);
    assert_eq!(connector.attempts(), 1);
    assert_eq!(
        outcomes(&recorded),
        vec![Err(
            "connect failed: protocol rejected with close code 1002".to_owned()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_surfaced_and_close_the_connection() {
    let (config, recorded) = recording_config();
    let (client, mut server, _connector, _ends) = raw_client(config).await;
    let probe = server.close_probe();

    common::accept_handshake(&mut server).await;
    settle().await;
    server.send_raw("HI");
    settle().await;

    let recorded = outcomes(&recorded);
    assert_eq!(recorded[0], Ok(()));
    let violation = recorded[1].clone().expect_err("protocol violation");
    assert!(violation.starts_with("protocol violation:"), "{violation}");

    assert_eq!(*probe.lock().expect("probe"), Some(close_code::PROTOCOL_ERROR));
    // Reconnection is disabled, so the violation closes the client for good.
    assert_eq!(client.state(), ClientState::Closed);
}
