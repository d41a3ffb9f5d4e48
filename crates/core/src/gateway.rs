//! Adapter-facing dispatch: inbound message in, outbound message out.

use crate::registry::SessionRegistry;
use async_trait::async_trait;
use clawgate_bus::{BusError, Event, EventKind, InboundMessage, MessageBus, MessageHandler, OutboundMessage};
use clawgate_providers::encode_metadata;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_KEY: &str = "request_id";

/// Routes every inbound message through the [`SessionRegistry`].
///
/// Prompt failures never escape as errors: they come back as an
/// [`OutboundMessage`] with empty content and the error text, so adapter
/// loops keep serving. Lifecycle events go to the bus when one is attached.
pub struct GatewayHandler {
    registry: Arc<SessionRegistry>,
    events: Option<MessageBus>,
}

impl GatewayHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            events: None,
        }
    }

    /// Publish lifecycle events on `bus`.
    pub fn with_events(mut self, bus: MessageBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn publish(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.publish_event(event);
        }
    }
}

#[async_trait]
impl MessageHandler for GatewayHandler {
    async fn handle(
        &self,
        cancel: &CancellationToken,
        message: InboundMessage,
    ) -> Result<OutboundMessage, BusError> {
        let request_id = Uuid::new_v4().to_string();
        let key = message.session_key();
        let span = info_span!(
            "request",
            request_id = %request_id,
            transport = %message.transport,
            chat_id = %message.chat_id,
            key = %key
        );

        self.publish(
            Event::new(EventKind::PromptReceived, &message, &request_id)
                .with_payload("sender_id", message.sender_id.clone())
                .with_payload("chars", message.content.chars().count().to_string()),
        );

        let outcome = self
            .registry
            .prompt(cancel, &key, &message.content)
            .instrument(span.clone())
            .await;

        let reply = match outcome {
            Ok(result) => {
                let mut metadata = encode_metadata(&result.metadata);
                metadata.insert(REQUEST_ID_KEY.to_string(), request_id.clone());

                let mut event = Event::new(EventKind::PromptCompleted, &message, &request_id)
                    .with_payload("provider", result.metadata.provider.clone())
                    .with_payload("model", result.metadata.model.clone());
                if let Some(usage) = result.metadata.usage {
                    event = event.with_payload("total_tokens", usage.total_tokens.to_string());
                }
                self.publish(event);

                OutboundMessage::reply_to(&message, result.text).with_metadata(metadata)
            }
            Err(e) => {
                warn!(parent: &span, error = %e, "Prompt failed");
                self.publish(
                    Event::new(EventKind::PromptFailed, &message, &request_id).with_error(e.to_string()),
                );

                let mut reply = OutboundMessage::failure(&message, e.to_string());
                reply.metadata.insert(REQUEST_ID_KEY.to_string(), request_id);
                reply
            }
        };

        Ok(reply)
    }
}
