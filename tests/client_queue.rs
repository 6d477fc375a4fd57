//! Outbound queueing: nothing reaches the wire before the handshake is
//! acknowledged, and the queue drains in strict order afterwards.

mod common;

use subwire::{
    ClientConfig, ClientError, ClientState, Message, SubscriptionId, SubscriptionRequest,
};
use subwire_testing::settle;

use common::{capture, expect_init, raw_client};

#[tokio::test(start_paused = true)]
async fn nothing_is_sent_before_init_success() {
    let (client, mut server, _connector, _ends) = raw_client(ClientConfig::default()).await;
    settle().await;

    let (sink_a, _) = capture();
    let (sink_b, _) = capture();
    let first = client
        .subscribe(SubscriptionRequest::new("subscription { a }"), sink_a)
        .expect("subscribe");
    let second = client
        .subscribe(SubscriptionRequest::new("subscription { b }"), sink_b)
        .expect("subscribe");
    client.unsubscribe(&first);
    settle().await;

    assert_eq!(client.state(), ClientState::AwaitingAck);
    assert_eq!(client.queued_messages(), 3);

    expect_init(&mut server).await;
    server.send_message(&Message::InitSuccess);
    settle().await;

    assert_eq!(client.state(), ClientState::Ready);
    assert_eq!(client.queued_messages(), 0);

    let mut wire = Vec::new();
    for _ in 0..3 {
        let message = server.recv_message().await.expect("queued frame");
        wire.push((message.kind(), message.id().cloned()));
    }
    assert_eq!(
        wire,
        vec![
            ("subscription_start", Some(first.clone())),
            ("subscription_start", Some(second)),
            ("subscription_end", Some(first)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn unsubscribing_an_unknown_id_queues_nothing() {
    let (client, _server, _connector, _ends) = raw_client(ClientConfig::default()).await;
    settle().await;

    client.unsubscribe(&SubscriptionId::Number(999));
    client.unsubscribe(&SubscriptionId::from("toString"));
    assert_eq!(client.queued_messages(), 0);
}

#[tokio::test(start_paused = true)]
async fn blank_queries_are_rejected_synchronously() {
    let (client, _server, _connector, _ends) = raw_client(ClientConfig::default()).await;
    settle().await;

    let (sink, _) = capture();
    let err = client
        .subscribe(SubscriptionRequest::new("   "), sink)
        .expect_err("blank query");
    assert!(matches!(err, ClientError::EmptyQuery));
    assert_eq!(client.queued_messages(), 0);
}

#[tokio::test(start_paused = true)]
async fn ids_increase_and_are_never_reused() {
    let (client, mut server, _connector, _ends) = raw_client(ClientConfig::default()).await;
    common::accept_handshake(&mut server).await;
    settle().await;

    let (sink_a, _) = capture();
    let (sink_b, _) = capture();
    let first = client
        .subscribe(SubscriptionRequest::new("subscription { a }"), sink_a)
        .expect("subscribe");
    client.unsubscribe(&first);
    let second = client
        .subscribe(SubscriptionRequest::new("subscription { b }"), sink_b)
        .expect("subscribe");

    assert_eq!(first, SubscriptionId::Number(1));
    assert_eq!(second, SubscriptionId::Number(2));
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_all_ends_every_subscription() {
    let (client, mut server, _connector, _ends) = raw_client(ClientConfig::default()).await;
    common::accept_handshake(&mut server).await;
    settle().await;

    let (sink_a, _) = capture();
    let (sink_b, _) = capture();
    let first = client
        .subscribe(SubscriptionRequest::new("subscription { a }"), sink_a)
        .expect("subscribe");
    let second = client
        .subscribe(SubscriptionRequest::new("subscription { b }"), sink_b)
        .expect("subscribe");
    settle().await;
    client.unsubscribe_all();
    settle().await;

    let mut ends = Vec::new();
    for _ in 0..4 {
        let message = server.recv_message().await.expect("frame");
        if message.kind() == "subscription_end" {
            ends.push(message.id().cloned().expect("end carries an id"));
        }
    }
    assert_eq!(ends, vec![first, second]);
}
