//! Registry routing and ordering under concurrent callers.

#![allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use clawgate_bus::{CancellationToken, InboundMessage, MessageBus, MessageHandler};
use clawgate_core::{BusWorker, GatewayHandler, SessionError, SessionOptions, SessionRegistry};
use clawgate_providers::{Backend, BackendError, PromptMetadata, PromptRequest, PromptResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Echo backend that counts calls, records prompt order and can be slowed
/// down or made to fail per prompt text.
#[derive(Default)]
struct RecordingBackend {
    creates: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
    slow_prefix: Option<(String, Duration)>,
    create_delay: Duration,
}

impl RecordingBackend {
    fn slow_for(prefix: &str, delay: Duration) -> Self {
        Self {
            slow_prefix: Some((prefix.to_string(), delay)),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    async fn health(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn create_session(&self, title: &str) -> Result<String, BackendError> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.create_delay).await;
        Ok(format!("{}#{}", title, n))
    }

    async fn prompt(&self, request: &PromptRequest) -> Result<PromptResult, BackendError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().push(request.text.clone());

        if let Some((prefix, delay)) = &self.slow_prefix {
            if request.text.starts_with(prefix.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if request.text.starts_with("fail") {
            return Err(BackendError::Api("500: boom".to_string()));
        }
        Ok(PromptResult::new(
            format!("ok:{}", request.text),
            PromptMetadata {
                provider: "recording".to_string(),
                ..PromptMetadata::default()
            },
        ))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_creates_one_session() {
    let backend = Arc::new(RecordingBackend {
        create_delay: Duration::from_millis(50),
        ..RecordingBackend::default()
    });
    let registry = Arc::new(SessionRegistry::new(backend.clone(), SessionOptions::default()));

    let mut tasks = Vec::new();
    for i in 0..16 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            registry
                .prompt(&CancellationToken::new(), "chat:1", &format!("m{}", i))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(backend.creates.load(Ordering::SeqCst), 1);
    assert_eq!(backend.calls().len(), 16);
    assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(registry.session("chat:1").unwrap().transcript().len(), 32);
}

#[tokio::test]
async fn test_cancelled_first_caller_does_not_repeat_bootstrap() {
    let backend = Arc::new(RecordingBackend {
        create_delay: Duration::from_millis(200),
        ..RecordingBackend::default()
    });
    let registry = SessionRegistry::new(backend.clone(), SessionOptions::default());

    let first = CancellationToken::new();
    let trigger = first.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    assert!(matches!(
        registry.prompt(&first, "k", "one").await,
        Err(SessionError::Cancelled)
    ));

    let reply = registry
        .prompt(&CancellationToken::new(), "k", "two")
        .await
        .unwrap();
    assert_eq!(reply.text, "ok:two");
    assert_eq!(backend.creates.load(Ordering::SeqCst), 1);
    assert_eq!(backend.calls(), vec!["two"]);
}

#[tokio::test]
async fn test_close_releases_caller_waiting_on_same_key() {
    let backend = Arc::new(RecordingBackend::slow_for("slow", Duration::from_millis(300)));
    let registry = Arc::new(SessionRegistry::new(
        backend,
        SessionOptions::default().with_heartbeat(Duration::from_secs(30)),
    ));
    registry
        .prompt(&CancellationToken::new(), "k", "warm")
        .await
        .unwrap();

    let running = {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry
                .prompt(&CancellationToken::new(), "k", "slow one")
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let waiting = {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry
                .prompt(&CancellationToken::new(), "k", "behind")
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    registry.close();

    let running = timeout(Duration::from_secs(1), running).await.unwrap().unwrap();
    assert!(matches!(running, Err(SessionError::Cancelled)));
    let waiting = timeout(Duration::from_secs(1), waiting).await.unwrap().unwrap();
    assert!(matches!(waiting, Err(SessionError::Closed)));
}

#[tokio::test]
async fn test_two_keys_two_sessions() {
    let backend = Arc::new(RecordingBackend::default());
    let registry = SessionRegistry::new(backend.clone(), SessionOptions::default());
    let cancel = CancellationToken::new();

    assert_eq!(registry.prompt(&cancel, "A", "one").await.unwrap().text, "ok:one");
    assert_eq!(registry.prompt(&cancel, "A", "two").await.unwrap().text, "ok:two");
    assert_eq!(backend.creates.load(Ordering::SeqCst), 1);

    assert_eq!(registry.prompt(&cancel, "B", "three").await.unwrap().text, "ok:three");
    assert_eq!(backend.creates.load(Ordering::SeqCst), 2);

    let a = registry.session("A").unwrap();
    assert_eq!(a.transcript().len(), 4);
    assert_eq!(registry.session("B").unwrap().transcript().len(), 2);
    assert_eq!(registry.keys(), vec!["A".to_string(), "B".to_string()]);
    assert_ne!(a.handle(), registry.session("B").unwrap().handle());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_key_does_not_block_other_key() {
    let backend = Arc::new(RecordingBackend::slow_for("slow", Duration::from_millis(500)));
    let registry = Arc::new(SessionRegistry::new(backend.clone(), SessionOptions::default()));
    let cancel = CancellationToken::new();

    // Warm both sessions so bootstrap is not part of the timing.
    registry.prompt(&cancel, "A", "warm").await.unwrap();
    registry.prompt(&cancel, "B", "warm").await.unwrap();

    let slow = {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry
                .prompt(&CancellationToken::new(), "A", "slow one")
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    registry.prompt(&cancel, "B", "quick").await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(250));

    slow.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_key_prompts_are_serialized() {
    let backend = Arc::new(RecordingBackend::slow_for("m", Duration::from_millis(10)));
    let registry = Arc::new(SessionRegistry::new(backend.clone(), SessionOptions::default()));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            registry
                .prompt(&CancellationToken::new(), "k", &format!("m{}", i))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_heartbeat_registry_preserves_enqueue_order() {
    let backend = Arc::new(RecordingBackend::default());
    let registry = SessionRegistry::new(
        backend.clone(),
        SessionOptions::default().with_heartbeat(Duration::from_secs(30)),
    );
    let cancel = CancellationToken::new();

    for text in ["one", "two", "three"] {
        assert_eq!(
            registry.prompt(&cancel, "hb", text).await.unwrap().text,
            format!("ok:{}", text)
        );
    }
    assert_eq!(backend.calls(), vec!["one", "two", "three"]);
    assert!(registry.session("hb").unwrap().heartbeat_running());

    registry.close();
}

#[tokio::test]
async fn test_backend_error_returned_and_session_kept() {
    let backend = Arc::new(RecordingBackend::default());
    let registry = SessionRegistry::new(backend.clone(), SessionOptions::default());
    let cancel = CancellationToken::new();

    let err = registry.prompt(&cancel, "k", "fail now").await.unwrap_err();
    assert!(matches!(err, SessionError::Backend { op: "prompt", .. }));
    assert!(registry.session("k").unwrap().transcript().is_empty());

    assert_eq!(registry.prompt(&cancel, "k", "after").await.unwrap().text, "ok:after");
    assert_eq!(backend.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_caller_gets_cancelled() {
    let backend = Arc::new(RecordingBackend::slow_for("slow", Duration::from_secs(5)));
    let registry = SessionRegistry::new(backend, SessionOptions::default());
    let cancel = CancellationToken::new();
    registry.prompt(&cancel, "k", "warm").await.unwrap();

    let caller = CancellationToken::new();
    let trigger = caller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = timeout(Duration::from_secs(1), registry.prompt(&caller, "k", "slow"))
        .await
        .unwrap();
    assert!(matches!(outcome, Err(SessionError::Cancelled)));
}

#[tokio::test]
async fn test_bus_worker_end_to_end() {
    let backend = Arc::new(RecordingBackend::default());
    let registry = Arc::new(SessionRegistry::new(backend.clone(), SessionOptions::default()));
    let bus = MessageBus::new();
    let handler: Arc<dyn MessageHandler> =
        Arc::new(GatewayHandler::new(registry.clone()).with_events(bus.clone()));

    let cancel = CancellationToken::new();
    let worker = tokio::spawn(BusWorker::new(bus.clone(), handler).run(cancel.clone()));

    for text in ["one", "fail here", "two"] {
        assert!(
            bus.publish_inbound(&cancel, InboundMessage::new("test", "A", text))
                .await
        );
    }

    let first = bus.subscribe_outbound(&cancel).await.unwrap();
    assert_eq!(first.content, "ok:one");
    let second = bus.subscribe_outbound(&cancel).await.unwrap();
    assert!(second.content.is_empty());
    assert!(second.error.unwrap().contains("boom"));
    let third = bus.subscribe_outbound(&cancel).await.unwrap();
    assert_eq!(third.content, "ok:two");
    assert_eq!(third.conversation_key, "test:A");

    assert_eq!(backend.creates.load(Ordering::SeqCst), 1);

    bus.close();
    timeout(Duration::from_secs(1), worker).await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bus_worker_overlaps_conversations() {
    let backend = Arc::new(RecordingBackend::slow_for("slow", Duration::from_millis(400)));
    let registry = Arc::new(SessionRegistry::new(backend.clone(), SessionOptions::default()));
    let bus = MessageBus::new();
    let handler: Arc<dyn MessageHandler> = Arc::new(GatewayHandler::new(registry));

    let cancel = CancellationToken::new();
    let worker = tokio::spawn(
        BusWorker::with_max_in_flight(bus.clone(), handler, 2).run(cancel.clone()),
    );

    bus.publish_inbound(&cancel, InboundMessage::new("test", "A", "slow one"))
        .await;
    bus.publish_inbound(&cancel, InboundMessage::new("test", "B", "quick"))
        .await;

    // B is answered while A is still in its backend call.
    let first = timeout(Duration::from_millis(300), bus.subscribe_outbound(&cancel))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.content, "ok:quick");
    let second = bus.subscribe_outbound(&cancel).await.unwrap();
    assert_eq!(second.content, "ok:slow one");
    assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 2);

    cancel.cancel();
    timeout(Duration::from_secs(1), worker).await.unwrap().unwrap();
}
