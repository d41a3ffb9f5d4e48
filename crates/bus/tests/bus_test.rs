#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Shutdown, backpressure and cancellation behaviour of the message bus.

use clawgate_bus::*;
use std::time::Duration;
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(1);

fn inbound(text: &str) -> InboundMessage {
    InboundMessage::new("test", "chat", text)
}

fn event(request_id: &str) -> Event {
    Event::new(EventKind::PromptCompleted, &inbound("x"), request_id)
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let bus = MessageBus::new();
    bus.close();
    bus.close();
    bus.clone().close();
    assert!(bus.is_closed());
}

#[tokio::test]
async fn test_close_unblocks_all_waiters() {
    let bus = MessageBus::new();
    let cancel = CancellationToken::new();

    let consumer = {
        let bus = bus.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { bus.consume_inbound(&cancel).await })
    };
    let outbound = {
        let bus = bus.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { bus.subscribe_outbound(&cancel).await })
    };
    let mut events = bus.subscribe_events(&cancel);

    tokio::time::sleep(Duration::from_millis(20)).await;
    bus.close();

    let consumed = timeout(DEADLINE, consumer).await.unwrap().unwrap();
    assert_eq!(consumed, Err(BusError::Closed));

    let subscribed = timeout(DEADLINE, outbound).await.unwrap().unwrap();
    assert_eq!(subscribed, Err(BusError::Closed));

    let next = timeout(DEADLINE, events.recv()).await.unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn test_publish_event_never_blocks_on_full_buffers() {
    let bus = MessageBus::with_capacity(4, 1);
    let cancel = CancellationToken::new();
    let mut first = bus.subscribe_events(&cancel);
    let _second = bus.subscribe_events(&cancel);

    // Fill both single-slot buffers.
    assert_eq!(bus.publish_event(event("fill")), 2);

    let start = tokio::time::Instant::now();
    for i in 0..1000 {
        assert_eq!(bus.publish_event(event(&format!("drop-{i}"))), 0);
    }
    assert!(start.elapsed() < Duration::from_millis(500));

    // Only the first event survived; later ones were dropped, not queued.
    assert_eq!(first.recv().await.unwrap().request_id, "fill");
    assert!(first.try_recv().is_none());
}

#[tokio::test]
async fn test_pre_cancelled_context_fails_immediately() {
    let bus = MessageBus::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let published = timeout(DEADLINE, bus.publish_inbound(&cancel, inbound("a"))).await.unwrap();
    assert!(!published);

    let published = timeout(
        DEADLINE,
        bus.publish_outbound(&cancel, OutboundMessage::reply_to(&inbound("a"), "b")),
    )
    .await
    .unwrap();
    assert!(!published);

    let consumed = timeout(DEADLINE, bus.consume_inbound(&cancel)).await.unwrap();
    assert_eq!(consumed, Err(BusError::Cancelled));

    let subscribed = timeout(DEADLINE, bus.subscribe_outbound(&cancel)).await.unwrap();
    assert_eq!(subscribed, Err(BusError::Cancelled));
}

#[tokio::test]
async fn test_full_queue_applies_backpressure() {
    let bus = MessageBus::with_capacity(1, 8);
    let cancel = CancellationToken::new();
    assert!(bus.publish_inbound(&cancel, inbound("first")).await);

    let blocked = {
        let bus = bus.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { bus.publish_inbound(&cancel, inbound("second")).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());

    assert_eq!(bus.consume_inbound(&cancel).await.unwrap().content, "first");
    assert!(timeout(DEADLINE, blocked).await.unwrap().unwrap());
    assert_eq!(bus.consume_inbound(&cancel).await.unwrap().content, "second");
}

#[tokio::test]
async fn test_cancel_releases_blocked_publisher() {
    let bus = MessageBus::with_capacity(1, 8);
    let cancel = CancellationToken::new();
    assert!(bus.publish_inbound(&cancel, inbound("first")).await);

    let caller = CancellationToken::new();
    let blocked = {
        let bus = bus.clone();
        let caller = caller.clone();
        tokio::spawn(async move { bus.publish_inbound(&caller, inbound("second")).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    caller.cancel();
    assert!(!timeout(DEADLINE, blocked).await.unwrap().unwrap());
}

#[tokio::test]
async fn test_subscription_ends_on_caller_cancel() {
    let bus = MessageBus::new();
    let caller = CancellationToken::new();
    let mut sub = bus.subscribe_events(&caller);
    assert_eq!(bus.subscriber_count(), 1);

    caller.cancel();
    let next = timeout(DEADLINE, sub.recv()).await.unwrap();
    assert!(next.is_none());
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn test_dropped_subscription_is_removed() {
    let bus = MessageBus::new();
    {
        let _sub = bus.subscribe_events(&CancellationToken::new());
        assert_eq!(bus.subscriber_count(), 1);
    }
    assert_eq!(bus.subscriber_count(), 0);
    assert_eq!(bus.publish_event(event("nobody")), 0);
}

#[tokio::test]
async fn test_subscribe_after_close_yields_nothing() {
    let bus = MessageBus::new();
    bus.close();
    let mut sub = bus.subscribe_events(&CancellationToken::new());
    assert!(timeout(DEADLINE, sub.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_outbound_round_trip() {
    let bus = MessageBus::new();
    let cancel = CancellationToken::new();
    let msg = inbound("q");
    assert!(bus.publish_outbound(&cancel, OutboundMessage::reply_to(&msg, "answer")).await);

    let reply = bus.subscribe_outbound(&cancel).await.unwrap();
    assert_eq!(reply.content, "answer");
    assert_eq!(reply.conversation_key, "test:chat");
}
