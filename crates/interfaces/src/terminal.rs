use crate::traits::{Transport, TransportError};
use async_trait::async_trait;
use clawgate_bus::{InboundMessage, MessageHandler};
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const TERMINAL_TRANSPORT: &str = "terminal";
pub const DEFAULT_CHAT_ID: &str = "local";

/// Line-oriented transport: one input line is one prompt, one reply is one
/// output line. Failures are written as `error: ...` lines.
pub struct TerminalTransport<R, W> {
    reader: Mutex<Lines<R>>,
    writer: Mutex<W>,
    chat_id: String,
    sender_id: String,
}

impl TerminalTransport<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> TerminalTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(reader.lines()),
            writer: Mutex::new(writer),
            chat_id: DEFAULT_CHAT_ID.to_string(),
            sender_id: std::env::var("USER").unwrap_or_else(|_| "user".to_string()),
        }
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = chat_id.into();
        self
    }

    /// Consume the transport and hand back its writer.
    pub fn into_writer(self) -> W {
        self.writer.into_inner()
    }

    /// `next_line` is cancel-safe: a line that is half read when the run is
    /// cancelled stays buffered in `Lines`.
    async fn read_line(&self) -> Result<Option<String>, TransportError> {
        let mut reader = self.reader.lock().await;
        let line = reader.next_line().await?;
        Ok(line.map(|line| line.trim().to_string()))
    }

    async fn send_output(&self, message: &str) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(message.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<R, W> Transport for TerminalTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        TERMINAL_TRANSPORT
    }

    async fn run(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError> {
        info!(chat_id = %self.chat_id, "Terminal transport started");

        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                line = self.read_line() => line?,
            };
            let Some(line) = line else {
                debug!("Terminal input closed");
                break;
            };
            if line.is_empty() {
                continue;
            }

            let message = InboundMessage::new(TERMINAL_TRANSPORT, &self.chat_id, line)
                .with_sender(&self.sender_id);

            match handler.handle(&cancel, message).await {
                Ok(reply) => match reply.error {
                    Some(error) => self.send_output(&format!("error: {}", error)).await?,
                    None => self.send_output(&reply.content).await?,
                },
                Err(e) if cancel.is_cancelled() => {
                    debug!(error = %e, "Handler interrupted by shutdown");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Handler failed");
                    self.send_output(&format!("error: {}", e)).await?;
                }
            }
        }

        info!("Terminal transport stopped");
        Ok(())
    }
}
