//! Bus drain worker: inbound queue -> handler -> outbound queue.

use clawgate_bus::{BusError, MessageBus, MessageHandler, OutboundMessage};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};

/// Consumes the bus inbound queue and publishes one reply per message.
///
/// With `max_in_flight == 1` messages are handled strictly in queue order.
/// Larger values let different conversations proceed concurrently; the
/// registry still serializes each conversation.
pub struct BusWorker {
    bus: MessageBus,
    handler: Arc<dyn MessageHandler>,
    concurrency_limiter: Arc<Semaphore>,
    span: Span,
}

impl BusWorker {
    pub fn new(bus: MessageBus, handler: Arc<dyn MessageHandler>) -> Self {
        Self::with_max_in_flight(bus, handler, 1)
    }

    pub fn with_max_in_flight(
        bus: MessageBus,
        handler: Arc<dyn MessageHandler>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            bus,
            handler,
            concurrency_limiter: Arc::new(Semaphore::new(max_in_flight.max(1))),
            span: info_span!("bus_worker"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Run until `cancel` fires or the bus closes.
    ///
    /// A failing message never stops the worker; it is answered with an
    /// error reply instead.
    pub async fn run(self, cancel: CancellationToken) {
        let span = self.span.clone();
        async move {
            info!("Bus worker started");
            let mut in_flight = JoinSet::new();

            loop {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    permit = self.concurrency_limiter.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(e) => {
                            error!("Concurrency limiter closed: {}", e);
                            break;
                        }
                    },
                };

                let message = match self.bus.consume_inbound(&cancel).await {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(reason = %e, "Inbound queue ended");
                        break;
                    }
                };

                let bus = self.bus.clone();
                let handler = self.handler.clone();
                let cancel = cancel.clone();
                in_flight.spawn(
                    async move {
                        let _permit = permit;
                        let reply = match handler.handle(&cancel, message.clone()).await {
                            Ok(reply) => reply,
                            Err(BusError::Cancelled) => return,
                            Err(e) => OutboundMessage::failure(&message, e.to_string()),
                        };
                        if !bus.publish_outbound(&cancel, reply).await {
                            debug!("Outbound reply dropped during shutdown");
                        }
                    }
                    .in_current_span(),
                );

                // Reap finished handlers so the set does not grow unbounded.
                while let Some(joined) = in_flight.try_join_next() {
                    if let Err(e) = joined {
                        error!("Handler task failed: {}", e);
                    }
                }
            }

            in_flight.shutdown().await;
            info!("Bus worker stopped");
        }
        .instrument(span)
        .await
    }
}

/// Serve `bus` with `handler` one message at a time until `cancel` fires
/// or the bus closes.
pub async fn run_bus_worker(
    bus: MessageBus,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) {
    BusWorker::new(bus, handler).run(cancel).await
}
