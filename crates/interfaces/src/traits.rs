use async_trait::async_trait;
use clawgate_bus::MessageHandler;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A source of inbound messages, e.g. a terminal or a chat platform.
///
/// `run` serves until the input ends or `cancel` fires. A failing message
/// must not end the run.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError>;
}
