mod common;

use common::{fast_channel_config, next_connection, wait_until, MockConnector, TIMEOUT};
use openapi_trade::core::kernel::codec::{Frame, JsonPushCodec};
use openapi_trade::trade::{
    CallbackRegistry, ChannelConfig, ChannelState, DispatchOutcome, EventDispatcher,
    SubscriptionChannel,
};
use openapi_trade::{OpenApiError, Topic};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_pre_active_calls_coalesce_into_one_message_per_topic() {
    let (connector, mut connections) = MockConnector::new();
    let (channel, _events) =
        SubscriptionChannel::spawn(connector, JsonPushCodec, fast_channel_config());

    channel.subscribe(&[Topic::Private]).unwrap();
    channel.unsubscribe(&[Topic::Private]).unwrap();
    channel.subscribe(&[Topic::Private]).unwrap();
    channel.subscribe(&[Topic::Private]).unwrap();

    let mut server = next_connection(&mut connections).await;
    let request = server.next_request().await;
    assert_eq!(request["op"], "subscribe");
    assert_eq!(request["topics"], json!(["private"]));

    // Changes while resubscribing collapse too
    channel.unsubscribe(&[Topic::Private]).unwrap();
    channel.subscribe(&[Topic::Private]).unwrap();

    server.ack(&request["id"], 0);
    wait_until(|| channel.state() == ChannelState::Active, "active").await;

    assert!(server.is_quiet_for(Duration::from_millis(150)).await);
    let state = channel.subscriptions()[0];
    assert!(state.desired && state.confirmed && state.projected);
}

#[tokio::test]
async fn test_unsubscribe_when_active_sends_one_message() {
    let (connector, mut connections) = MockConnector::new();
    let (channel, _events) =
        SubscriptionChannel::spawn(connector, JsonPushCodec, fast_channel_config());

    channel.subscribe(&[Topic::Private]).unwrap();
    let mut server = next_connection(&mut connections).await;
    let request = server.next_request().await;
    server.ack(&request["id"], 0);
    wait_until(|| channel.state() == ChannelState::Active, "active").await;

    channel.unsubscribe(&[Topic::Private]).unwrap();
    channel.unsubscribe(&[Topic::Private]).unwrap();

    let request = server.next_request().await;
    assert_eq!(request["op"], "unsubscribe");
    server.ack(&request["id"], 0);
    assert!(server.is_quiet_for(Duration::from_millis(150)).await);
}

#[tokio::test]
async fn test_resubscribes_after_forced_disconnect() {
    let (connector, mut connections) = MockConnector::new();
    let (channel, _events) =
        SubscriptionChannel::spawn(connector, JsonPushCodec, fast_channel_config());

    channel.subscribe(&[Topic::Private]).unwrap();
    let mut first = next_connection(&mut connections).await;
    let request = first.next_request().await;
    first.ack(&request["id"], 0);
    wait_until(|| channel.state() == ChannelState::Active, "first active").await;
    assert_eq!(channel.generation(), 1);

    drop(first);

    let mut second = next_connection(&mut connections).await;
    let request = second.next_request().await;
    assert_eq!(request["op"], "subscribe");
    assert_eq!(request["topics"], json!(["private"]));
    second.ack(&request["id"], 0);

    wait_until(
        || channel.generation() == 2 && channel.state() == ChannelState::Active,
        "second active",
    )
    .await;
    assert!(channel.subscriptions()[0].confirmed);
}

#[tokio::test]
async fn test_frames_from_previous_connection_are_stale() {
    let (connector, mut connections) = MockConnector::new();
    let (channel, mut events) =
        SubscriptionChannel::spawn(connector, JsonPushCodec, fast_channel_config());
    let registry = Arc::new(CallbackRegistry::new());
    registry.set_on_order_changed(|_| {});
    let dispatcher = EventDispatcher::new(registry, channel.generation_handle());

    channel.subscribe(&[Topic::Private]).unwrap();
    let mut first = next_connection(&mut connections).await;
    let request = first.next_request().await;
    first.ack(&request["id"], 0);
    first.push_order_changed("1", "NewStatus");

    let old = tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(old.generation, 1);

    drop(first);
    let mut second = next_connection(&mut connections).await;
    let request = second.next_request().await;
    second.ack(&request["id"], 0);
    second.push_order_changed("1", "FilledStatus");

    let new = tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(new.generation, 2);

    assert_eq!(dispatcher.dispatch(old), DispatchOutcome::Stale);
    assert_eq!(dispatcher.dispatch(new), DispatchOutcome::Delivered);
}

#[tokio::test]
async fn test_malformed_frame_does_not_end_receive_loop() {
    let (connector, mut connections) = MockConnector::new();
    let (channel, mut events) =
        SubscriptionChannel::spawn(connector.clone(), JsonPushCodec, fast_channel_config());

    channel.subscribe(&[Topic::Private]).unwrap();
    let mut server = next_connection(&mut connections).await;
    let request = server.next_request().await;
    server.ack(&request["id"], 0);

    server.send_text("{definitely not json");
    server.send_json(json!({"type": "mystery"}));
    server.send_json(json!({"type": "error", "code": 500, "message": "hiccup"}));
    server.push_order_changed("9", "NewStatus");

    let envelope = tokio::time::timeout(TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(envelope.frame, Frame::Push { ref event, .. } if event == "order_changed"));
    assert_eq!(channel.state(), ChannelState::Active);
    assert_eq!(channel.generation(), 1);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn test_goes_active_when_acks_time_out() {
    let (connector, mut connections) = MockConnector::new();
    let (channel, _events) =
        SubscriptionChannel::spawn(connector, JsonPushCodec, fast_channel_config());

    channel.subscribe(&[Topic::Private]).unwrap();
    let mut server = next_connection(&mut connections).await;
    server.next_request().await;
    assert_eq!(channel.state(), ChannelState::Resubscribing);

    wait_until(|| channel.state() == ChannelState::Active, "ack timeout").await;
    assert!(!channel.subscriptions()[0].confirmed);
}

#[tokio::test]
async fn test_rejected_subscription_stays_unconfirmed() {
    let (connector, mut connections) = MockConnector::new();
    let (channel, _events) =
        SubscriptionChannel::spawn(connector, JsonPushCodec, fast_channel_config());

    channel.subscribe(&[Topic::Private]).unwrap();
    let mut server = next_connection(&mut connections).await;
    let request = server.next_request().await;
    server.ack(&request["id"], 403);

    wait_until(|| channel.state() == ChannelState::Active, "active").await;
    assert!(!channel.subscriptions()[0].confirmed);
    assert!(server.is_quiet_for(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn test_reconnects_with_backoff_after_failed_connects() {
    let (connector, mut connections) = MockConnector::new();
    connector.fail_next(2);
    let (channel, _events) =
        SubscriptionChannel::spawn(connector.clone(), JsonPushCodec, fast_channel_config());

    channel.start().unwrap();
    let mut server = next_connection(&mut connections).await;
    assert_eq!(connector.attempts(), 3);

    // Nothing desired yet, so nothing to acknowledge
    wait_until(|| channel.state() == ChannelState::Active, "active").await;
    assert!(server.is_quiet_for(Duration::from_millis(50)).await);
}

#[tokio::test]
async fn test_idle_connection_is_dropped() {
    let (connector, mut connections) = MockConnector::new();
    let config = ChannelConfig {
        heartbeat_interval: Duration::from_millis(40),
        ..fast_channel_config()
    };
    let (channel, _events) = SubscriptionChannel::spawn(connector, JsonPushCodec, config);

    channel.start().unwrap();
    let _silent = next_connection(&mut connections).await;
    let _next = next_connection(&mut connections).await;
    wait_until(|| channel.generation() >= 2, "reconnect").await;
}

#[tokio::test]
async fn test_stop_closes_transport_and_is_terminal() {
    let (connector, mut connections) = MockConnector::new();
    let (channel, _events) =
        SubscriptionChannel::spawn(connector.clone(), JsonPushCodec, fast_channel_config());
    let mut states = channel.state_changes();

    channel.subscribe(&[Topic::Private]).unwrap();
    let mut server = next_connection(&mut connections).await;
    let request = server.next_request().await;
    server.ack(&request["id"], 0);
    wait_until(|| channel.state() == ChannelState::Active, "active").await;

    tokio::time::timeout(TIMEOUT, channel.stop()).await.unwrap();
    server.wait_closed().await;

    assert_eq!(channel.state(), ChannelState::Disconnected);
    assert_eq!(*states.borrow_and_update(), ChannelState::Disconnected);
    assert!(matches!(
        channel.subscribe(&[Topic::Private]),
        Err(OpenApiError::ClientClosed)
    ));
    assert!(matches!(channel.start(), Err(OpenApiError::ClientClosed)));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn test_stop_interrupts_backoff() {
    let (connector, _connections) = MockConnector::new();
    connector.fail_next(usize::MAX);
    let config = ChannelConfig {
        backoff_base: Duration::from_secs(30),
        backoff_max: Duration::from_secs(30),
        ..fast_channel_config()
    };
    let (channel, _events) = SubscriptionChannel::spawn(connector.clone(), JsonPushCodec, config);

    channel.start().unwrap();
    wait_until(|| connector.attempts() == 1, "first attempt").await;

    tokio::time::timeout(Duration::from_secs(1), channel.stop())
        .await
        .expect("stop should not wait for the backoff delay");
    assert_eq!(channel.state(), ChannelState::Disconnected);
}

#[tokio::test]
async fn test_backoff_grows_when_server_drops_every_connection() {
    let (connector, mut connections) = MockConnector::new();
    let config = ChannelConfig {
        backoff_base: Duration::from_millis(100),
        backoff_max: Duration::from_secs(5),
        backoff_jitter: 0.0,
        backoff_reset_after: Duration::from_secs(1),
        ..fast_channel_config()
    };
    let (channel, _events) = SubscriptionChannel::spawn(connector.clone(), JsonPushCodec, config);

    // Accept the handshake, then hang up straight away
    let server = tokio::spawn(async move {
        while let Some(connection) = connections.recv().await {
            drop(connection);
        }
    });

    channel.start().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Delays of 100, 200 and 400ms put the fourth attempt at 700ms
    let attempts = connector.attempts();
    assert!(
        (3..=5).contains(&attempts),
        "expected growing delays, got {} attempts",
        attempts
    );

    channel.stop().await;
    server.abort();
}

#[tokio::test]
async fn test_unsubscribe_without_subscriptions_stays_idle() {
    let (connector, _connections) = MockConnector::new();
    let (channel, _events) =
        SubscriptionChannel::spawn(connector.clone(), JsonPushCodec, fast_channel_config());

    channel.unsubscribe(&[Topic::Private]).unwrap();
    channel.subscribe(&[Topic::Private]).unwrap();
    channel.unsubscribe(&[Topic::Private]).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.attempts(), 0);
    assert_eq!(channel.state(), ChannelState::Disconnected);
}
