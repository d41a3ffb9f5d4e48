pub mod gateway;
pub mod health;
pub mod prompt;
pub mod repl;

use crate::config::Config;
use clawgate_bus::{MessageBus, MessageHandler};
use clawgate_core::{GatewayHandler, SessionRegistry};
use clawgate_providers::{build_backend, Backend};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span};

/// Name the gateway handler is registered under on the bus.
pub const GATEWAY_HANDLER: &str = "gateway";

pub fn backend(config: &Config) -> Arc<dyn Backend> {
    build_backend(&config.backend_settings())
}

pub fn registry(config: &Config) -> Arc<SessionRegistry> {
    Arc::new(
        SessionRegistry::new(backend(config), config.session_options())
            .with_span(info_span!("registry", agent = %config.agent)),
    )
}

/// Build the bus and register a [`GatewayHandler`] on it.
pub fn gateway_bus(config: &Config, registry: Arc<SessionRegistry>) -> (MessageBus, Arc<dyn MessageHandler>) {
    let bus = MessageBus::with_capacity(config.bus.capacity, config.bus.event_buffer);
    let handler: Arc<dyn MessageHandler> =
        Arc::new(GatewayHandler::new(registry).with_events(bus.clone()));
    bus.register_handler(GATEWAY_HANDLER, handler.clone());
    (bus, handler)
}

/// Log every lifecycle event at debug level until `cancel` fires.
pub fn spawn_event_logger(bus: &MessageBus, cancel: &CancellationToken) -> JoinHandle<()> {
    let mut events = bus.subscribe_events(cancel);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(
                kind = event.kind.as_str(),
                key = %event.conversation_key,
                request_id = %event.request_id,
                error = event.error.as_deref().unwrap_or(""),
                "event"
            );
        }
    })
}
