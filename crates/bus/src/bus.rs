//! Bounded message queues plus a best-effort event broadcast.

use crate::error::BusError;
use crate::handler::MessageHandler;
use crate::types::{Event, InboundMessage, OutboundMessage};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Default capacity of the inbound and outbound queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default per-subscriber event buffer.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Subscribers and transport handlers, guarded by a single lock.
#[derive(Default)]
struct Registries {
    subscribers: HashMap<u64, mpsc::Sender<Event>>,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

struct BusInner {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<mpsc::Receiver<OutboundMessage>>,
    registries: RwLock<Registries>,
    next_subscriber_id: AtomicU64,
    event_buffer: usize,
    closed: CancellationToken,
    close_started: AtomicBool,
}

impl BusInner {
    fn remove_subscriber(&self, id: u64) {
        if self.registries.write().subscribers.remove(&id).is_some() {
            debug!(subscriber = id, "event subscriber removed");
        }
    }
}

/// In-process transport between adapters and the prompt worker.
///
/// Cheap to clone; all clones share the same queues and close signal.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY, DEFAULT_EVENT_BUFFER)
    }

    /// Create a bus with custom queue and per-subscriber event buffer sizes.
    ///
    /// Zero values are raised to one.
    pub fn with_capacity(queue_capacity: usize, event_buffer: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(queue_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_capacity.max(1));

        Self {
            inner: Arc::new(BusInner {
                inbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
                outbound_tx,
                outbound_rx: Mutex::new(outbound_rx),
                registries: RwLock::new(Registries::default()),
                next_subscriber_id: AtomicU64::new(1),
                event_buffer: event_buffer.max(1),
                closed: CancellationToken::new(),
                close_started: AtomicBool::new(false),
            }),
        }
    }

    /// Queue a message for the worker.
    ///
    /// Suspends while the queue is full. Returns `false` if `cancel` fires
    /// or the bus is closed before the message is accepted.
    pub async fn publish_inbound(&self, cancel: &CancellationToken, msg: InboundMessage) -> bool {
        if cancel.is_cancelled() || self.is_closed() {
            return false;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.inner.closed.cancelled() => false,
            sent = self.inner.inbound_tx.send(msg) => sent.is_ok(),
        }
    }

    /// Queue a reply for whoever is subscribed to outbound traffic.
    pub async fn publish_outbound(&self, cancel: &CancellationToken, msg: OutboundMessage) -> bool {
        if cancel.is_cancelled() || self.is_closed() {
            return false;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.inner.closed.cancelled() => false,
            sent = self.inner.outbound_tx.send(msg) => sent.is_ok(),
        }
    }

    /// Wait for the next inbound message.
    pub async fn consume_inbound(&self, cancel: &CancellationToken) -> Result<InboundMessage, BusError> {
        self.receive(cancel, &self.inner.inbound_rx).await
    }

    /// Wait for the next outbound message.
    pub async fn subscribe_outbound(&self, cancel: &CancellationToken) -> Result<OutboundMessage, BusError> {
        self.receive(cancel, &self.inner.outbound_rx).await
    }

    async fn receive<T>(
        &self,
        cancel: &CancellationToken,
        queue: &Mutex<mpsc::Receiver<T>>,
    ) -> Result<T, BusError> {
        if cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BusError::Cancelled),
            _ = self.inner.closed.cancelled() => return Err(BusError::Closed),
            rx = queue.lock() => rx,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BusError::Cancelled),
            _ = self.inner.closed.cancelled() => Err(BusError::Closed),
            msg = rx.recv() => msg.ok_or(BusError::Closed),
        }
    }

    /// Broadcast an event to every current subscriber without blocking.
    ///
    /// Subscribers whose buffer is full miss the event. Returns the number
    /// of subscribers that accepted it.
    pub fn publish_event(&self, event: Event) -> usize {
        let subscribers: Vec<(u64, mpsc::Sender<Event>)> = self
            .inner
            .registries
            .read()
            .subscribers
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in subscribers {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    metrics::counter!("clawgate_events_dropped", 1);
                    trace!(subscriber = id, kind = event.kind.as_str(), "event dropped");
                }
            }
        }
        delivered
    }

    /// Subscribe to lifecycle events.
    ///
    /// The subscription ends when it is unsubscribed or dropped, when
    /// `cancel` fires, or when the bus closes; after that `recv` drains what
    /// was buffered and then returns `None`. Must be called from within a
    /// tokio runtime.
    pub fn subscribe_events(&self, cancel: &CancellationToken) -> EventSubscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.event_buffer);
        let stop = CancellationToken::new();

        if !self.is_closed() {
            self.inner.registries.write().subscribers.insert(id, tx);
            debug!(subscriber = id, "event subscriber added");

            let weak = Arc::downgrade(&self.inner);
            let cancel = cancel.clone();
            let closed = self.inner.closed.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = closed.cancelled() => {}
                    _ = stop.cancelled() => {}
                }
                if let Some(inner) = weak.upgrade() {
                    inner.remove_subscriber(id);
                }
            });
        }

        EventSubscription {
            rx,
            unsubscribe: Unsubscribe {
                id,
                stop,
                bus: Arc::downgrade(&self.inner),
            },
        }
    }

    /// Register a transport-specific handler under `name`, replacing any previous one.
    pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let name = name.into();
        debug!(transport = %name, "handler registered");
        self.inner.registries.write().handlers.insert(name, handler);
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn MessageHandler>> {
        self.inner.registries.read().handlers.get(name).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registries.read().subscribers.len()
    }

    /// Shut the bus down. Idempotent.
    ///
    /// Every blocked consumer, publisher and event subscription is released.
    pub fn close(&self) {
        if self.inner.close_started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.closed.cancel();
        let dropped = {
            let mut registries = self.inner.registries.write();
            let count = registries.subscribers.len();
            registries.subscribers.clear();
            count
        };
        info!(subscribers = dropped, "message bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

/// Idempotent handle that tears down one event subscription.
#[derive(Clone)]
pub struct Unsubscribe {
    id: u64,
    stop: CancellationToken,
    bus: Weak<BusInner>,
}

impl Unsubscribe {
    pub fn unsubscribe(&self) {
        if self.stop.is_cancelled() {
            return;
        }
        self.stop.cancel();
        if let Some(inner) = self.bus.upgrade() {
            inner.remove_subscriber(self.id);
        }
    }
}

/// Receiving side of an event subscription.
pub struct EventSubscription {
    rx: mpsc::Receiver<Event>,
    unsubscribe: Unsubscribe,
}

impl EventSubscription {
    pub fn id(&self) -> u64 {
        self.unsubscribe.id
    }

    /// Next event, or `None` once the subscription has been torn down and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(&self) {
        self.unsubscribe.unsubscribe();
    }

    /// Detached unsubscribe handle, usable from another task.
    pub fn unsubscriber(&self) -> Unsubscribe {
        self.unsubscribe.clone()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.unsubscribe.unsubscribe();
    }
}
