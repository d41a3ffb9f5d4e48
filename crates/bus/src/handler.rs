//! The single entry point the runtime exposes to transport adapters.

use crate::error::BusError;
use crate::types::{InboundMessage, OutboundMessage};
use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Turns one inbound message into one outbound reply.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        cancel: &CancellationToken,
        message: InboundMessage,
    ) -> Result<OutboundMessage, BusError>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(CancellationToken, InboundMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<OutboundMessage, BusError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(CancellationToken, InboundMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<OutboundMessage, BusError>> + Send,
{
    async fn handle(
        &self,
        cancel: &CancellationToken,
        message: InboundMessage,
    ) -> Result<OutboundMessage, BusError> {
        (self.f)(cancel.clone(), message).await
    }
}
