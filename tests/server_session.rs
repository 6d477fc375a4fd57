//! Server session behavior, driven through a hand-held client transport.

use std::{sync::Arc, time::Duration};

use serde_json::json;
use subwire::{
    ExecutorHandle, Message, SubscriptionId, SubscriptionRequest, SubscriptionServer,
    protocol::EventPayload,
};
use subwire::protocol::ProtocolError;
use subwire_testing::{MemoryTransport, RecordingHooks, ScriptedExecutor, settle};

type Harness = (
    Arc<ScriptedExecutor>,
    Arc<RecordingHooks>,
    SubscriptionServer<Arc<ScriptedExecutor>, Arc<RecordingHooks>>,
);

fn harness() -> Harness {
    let executor = Arc::new(ScriptedExecutor::default());
    let hooks = Arc::new(RecordingHooks::default());
    let server = SubscriptionServer::new(Arc::clone(&executor)).with_hooks(Arc::clone(&hooks));
    (executor, hooks, server)
}

async fn handshake(client: &mut MemoryTransport, params: Option<serde_json::Value>) {
    client.send_message(&Message::Init { payload: params });
    let reply = client.recv_message().await.expect("handshake reply");
    assert_eq!(reply.kind(), "init_success");
}

async fn start(client: &mut MemoryTransport, id: u64, query: &str) {
    client.send_message(&Message::SubscriptionStart {
        id: SubscriptionId::Number(id),
        payload: SubscriptionRequest::new(query),
    });
    let reply = client.recv_message().await.expect("start reply");
    assert_eq!(reply.kind(), "subscription_success");
    assert_eq!(reply.id(), Some(&SubscriptionId::Number(id)));
}

#[tokio::test(start_paused = true)]
async fn handshake_invokes_the_connect_hook() {
    let (_executor, hooks, server) = harness();
    let (mut client, server_end) = subwire_testing::memory_pair();
    server.attach(server_end, Some("test-peer".to_owned()));

    handshake(&mut client, Some(json!({"auth": "secret"}))).await;

    assert_eq!(hooks.connect_count(), 1);
    assert_eq!(hooks.last_connect_params(), Some(json!({"auth": "secret"})));
    assert_eq!(server.registry().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_handshake_sends_init_fail_and_closes() {
    let (executor, hooks, server) = harness();
    hooks.reject_connect("Error");
    let (mut client, server_end) = subwire_testing::memory_pair();
    server.attach(server_end, None);

    client.send_message(&Message::Init { payload: None });
    match client.recv_message().await.expect("reply") {
        Message::InitFail { payload } => assert_eq!(payload.error, "Error"),
        other => panic!("expected init_fail, got {}", other.kind()),
    }
    assert!(client.recv_message().await.is_none());
    settle().await;

    assert_eq!(hooks.disconnect_count(), 1);
    assert!(server.registry().is_empty());
    assert!(executor.subscribed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn subscription_traffic_before_ready_is_rejected() {
    let (executor, _hooks, server) = harness();
    let (mut client, server_end) = subwire_testing::memory_pair();
    server.attach(server_end, None);

    client.send_message(&Message::SubscriptionStart {
        id: SubscriptionId::Number(1),
        payload: SubscriptionRequest::new("subscription { early }"),
    });
    match client.recv_message().await.expect("reply") {
        Message::SubscriptionFail { id, payload } => {
            assert_eq!(id, Some(SubscriptionId::Number(1)));
            assert!(!payload.into_errors().is_empty());
        }
        other => panic!("expected subscription_fail, got {}", other.kind()),
    }
    assert!(executor.subscribed().is_empty());

    // The connection itself survives and can still initialise.
    handshake(&mut client, None).await;
}

#[tokio::test(start_paused = true)]
async fn subscribe_hook_rejection_reaches_no_executor() {
    let (executor, hooks, server) = harness();
    hooks.reject_subscribe("forbidden");
    let (mut client, server_end) = subwire_testing::memory_pair();
    server.attach(server_end, None);
    handshake(&mut client, None).await;

    client.send_message(&Message::SubscriptionStart {
        id: SubscriptionId::Number(1),
        payload: SubscriptionRequest::new("subscription { secret }"),
    });
    match client.recv_message().await.expect("reply") {
        Message::SubscriptionFail { payload, .. } => {
            assert_eq!(payload.into_errors(), vec![ProtocolError::new("forbidden")]);
        }
        other => panic!("expected subscription_fail, got {}", other.kind()),
    }
    assert!(executor.subscribed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn executor_rejection_registers_nothing() {
    let (executor, _hooks, server) = harness();
    executor.reject_with(vec![ProtocolError::new("no such field")]);
    let (mut client, server_end) = subwire_testing::memory_pair();
    server.attach(server_end, None);
    handshake(&mut client, None).await;

    client.send_message(&Message::SubscriptionStart {
        id: SubscriptionId::Number(1),
        payload: SubscriptionRequest::new("subscription { nope }"),
    });
    match client.recv_message().await.expect("reply") {
        Message::SubscriptionFail { payload, .. } => {
            assert_eq!(
                payload.into_errors(),
                vec![ProtocolError::new("no such field")]
            );
        }
        other => panic!("expected subscription_fail, got {}", other.kind()),
    }
    assert_eq!(executor.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn executor_events_are_forwarded_verbatim() {
    let (executor, _hooks, server) = harness();
    let (mut client, server_end) = subwire_testing::memory_pair();
    server.attach(server_end, None);
    handshake(&mut client, None).await;
    start(&mut client, 1, "subscription { ticks }").await;

    let payload = EventPayload {
        data: Some(json!({"tick": 1})),
        errors: Some(vec![ProtocolError::new("partial")]),
    };
    executor.publish("ticks", &payload);
    match client.recv_message().await.expect("data frame") {
        Message::SubscriptionData { id, payload: got } => {
            assert_eq!(id, SubscriptionId::Number(1));
            assert_eq!(got, payload);
        }
        other => panic!("expected subscription_data, got {}", other.kind()),
    }
}

#[tokio::test(start_paused = true)]
async fn terminal_executor_failure_tears_the_entry_down() {
    let (executor, _hooks, server) = harness();
    let (mut client, server_end) = subwire_testing::memory_pair();
    server.attach(server_end, None);
    handshake(&mut client, None).await;
    start(&mut client, 1, "subscription { ticks }").await;

    executor.fail("ticks", &[ProtocolError::new("source went away")]);
    match client.recv_message().await.expect("fail frame") {
        Message::SubscriptionFail { id, payload } => {
            assert_eq!(id, Some(SubscriptionId::Number(1)));
            assert_eq!(
                payload.into_errors(),
                vec![ProtocolError::new("source went away")]
            );
        }
        other => panic!("expected subscription_fail, got {}", other.kind()),
    }
    settle().await;
    assert_eq!(executor.released(), vec![ExecutorHandle::new(0)]);

    // Nothing is forwarded for a released subscription.
    executor.publish("ticks", &EventPayload::from_data(json!({"tick": 2})));
    let nothing = tokio::time::timeout(Duration::from_secs(5), client.recv_message()).await;
    assert!(nothing.is_err(), "unexpected frame: {nothing:?}");
}

#[tokio::test(start_paused = true)]
async fn naturally_ended_streams_send_subscription_end() {
    let (executor, _hooks, server) = harness();
    let (mut client, server_end) = subwire_testing::memory_pair();
    server.attach(server_end, None);
    handshake(&mut client, None).await;
    start(&mut client, 1, "subscription { ticks }").await;

    executor.end("ticks");
    match client.recv_message().await.expect("end frame") {
        Message::SubscriptionEnd { id } => assert_eq!(id, SubscriptionId::Number(1)),
        other => panic!("expected subscription_end, got {}", other.kind()),
    }
    settle().await;
    assert_eq!(executor.released(), vec![ExecutorHandle::new(0)]);
}

#[tokio::test(start_paused = true)]
async fn client_unsubscribe_releases_and_unknown_ids_are_noops() {
    let (executor, hooks, server) = harness();
    let (mut client, server_end) = subwire_testing::memory_pair();
    server.attach(server_end, None);
    handshake(&mut client, None).await;
    start(&mut client, 1, "subscription { ticks }").await;

    client.send_message(&Message::SubscriptionEnd {
        id: SubscriptionId::Number(1),
    });
    settle().await;
    assert_eq!(hooks.unsubscribed(), vec![SubscriptionId::Number(1)]);
    assert_eq!(executor.released(), vec![ExecutorHandle::new(0)]);

    // Unknown ids, reserved-looking names included, change nothing.
    client.send_message(&Message::SubscriptionEnd {
        id: SubscriptionId::from("toString"),
    });
    client.send_message(&Message::SubscriptionEnd {
        id: SubscriptionId::Number(99),
    });
    settle().await;
    assert_eq!(hooks.unsubscribed().len(), 1);

    // The session is still healthy.
    start(&mut client, 2, "subscription { more }").await;
}

#[tokio::test(start_paused = true)]
async fn reusing_a_live_id_replaces_the_subscription() {
    let (executor, _hooks, server) = harness();
    let (mut client, server_end) = subwire_testing::memory_pair();
    server.attach(server_end, None);
    handshake(&mut client, None).await;
    start(&mut client, 1, "subscription { first }").await;
    start(&mut client, 1, "subscription { second }").await;

    settle().await;
    assert_eq!(executor.subscribed().len(), 2);
    assert_eq!(executor.released(), vec![ExecutorHandle::new(0)]);
    assert_eq!(executor.live_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unparseable_frames_are_answered_in_protocol() {
    let (_executor, _hooks, server) = harness();
    let (mut client, server_end) = subwire_testing::memory_pair();
    server.attach(server_end, None);

    for (frame, expect_id) in [
        ("HI", None),
        ("{}", None),
        (r#"{"type":"bogus","id":5}"#, Some(SubscriptionId::Number(5))),
    ] {
        client.send_raw(frame);
        match client.recv_message().await.expect("reply") {
            Message::SubscriptionFail { id, payload } => {
                assert_eq!(id, expect_id, "frame: {frame}");
                assert!(!payload.into_errors().is_empty());
            }
            other => panic!("expected subscription_fail, got {}", other.kind()),
        }
    }

    // Nonsense never kills the connection.
    handshake(&mut client, None).await;
}

#[tokio::test(start_paused = true)]
async fn keepalives_flow_only_after_ready() {
    let (_executor, _hooks, server) = harness();
    let server = server.keepalive(Duration::from_secs(10));
    let (mut client, server_end) = subwire_testing::memory_pair();
    server.attach(server_end, None);

    // Nothing is probed while the handshake is outstanding.
    let silent = tokio::time::timeout(Duration::from_secs(30), client.recv_message()).await;
    assert!(silent.is_err(), "unexpected frame: {silent:?}");

    handshake(&mut client, None).await;
    for _ in 0..2 {
        let probe = client.recv_message().await.expect("keepalive");
        assert_eq!(probe.kind(), "keepalive");
    }
}

#[tokio::test(start_paused = true)]
async fn disconnect_sweeps_every_registered_subscription() {
    let (executor, hooks, server) = harness();
    let (mut client, server_end) = subwire_testing::memory_pair();
    let connection = server.attach(server_end, None);
    handshake(&mut client, None).await;
    start(&mut client, 1, "subscription { a }").await;
    start(&mut client, 2, "subscription { b }").await;

    drop(client);
    settle().await;

    assert_eq!(hooks.disconnect_count(), 1);
    assert_eq!(hooks.unsubscribed().len(), 2);
    assert_eq!(executor.released().len(), 2);
    assert_eq!(executor.live_count(), 0);
    assert!(server.registry().get(&connection).is_none());
}

#[tokio::test(start_paused = true)]
async fn registry_end_cancels_the_session() {
    let (executor, hooks, server) = harness();
    let (mut client, server_end) = subwire_testing::memory_pair();
    let connection = server.attach(server_end, None);
    handshake(&mut client, None).await;
    start(&mut client, 1, "subscription { a }").await;

    assert!(server.registry().end(&connection));
    assert!(client.recv_message().await.is_none());
    settle().await;

    assert_eq!(hooks.disconnect_count(), 1);
    assert_eq!(executor.live_count(), 0);
    assert!(server.registry().is_empty());
}
