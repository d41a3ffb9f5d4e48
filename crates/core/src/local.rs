//! Single-conversation client that talks to a backend without a bus.

use crate::error::SessionError;
use crate::session::{SessionInstance, SessionOptions};
use crate::transcript::TranscriptEntry;
use clawgate_providers::{Backend, PromptResult};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument, Span};

/// One started [`SessionInstance`] plus its drain loop, if any.
pub struct LocalSession {
    session: Arc<SessionInstance>,
    shutdown: CancellationToken,
    heartbeat: Option<JoinHandle<()>>,
}

impl LocalSession {
    /// Start a session against `backend`.
    ///
    /// The agent's system profile is looked up once here when no system
    /// prompt is configured.
    pub async fn start(
        backend: Arc<dyn Backend>,
        options: SessionOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, SessionError> {
        Self::start_with_span(backend, options, cancel, info_span!("local_session")).await
    }

    pub async fn start_with_span(
        backend: Arc<dyn Backend>,
        mut options: SessionOptions,
        cancel: &CancellationToken,
        span: Span,
    ) -> Result<Self, SessionError> {
        if options.system_prompt.is_none() {
            options.system_prompt = backend.system_profile(&options.agent);
        }

        let session = Arc::new(SessionInstance::new(backend, options).with_span(span.clone()));
        session.start(cancel).await?;

        let shutdown = CancellationToken::new();
        let heartbeat = session.heartbeat_enabled().then(|| {
            let loop_session = session.clone();
            let cancel = shutdown.clone();
            tokio::spawn(
                async move {
                    if let Err(e) = loop_session.run_heartbeat(cancel).await {
                        error!(error = %e, "Heartbeat loop exited with error");
                    }
                }
                .instrument(span),
            )
        });

        Ok(Self {
            session,
            shutdown,
            heartbeat,
        })
    }

    /// Send one prompt, through the drain loop when heartbeat mode is on.
    pub async fn prompt(
        &self,
        cancel: &CancellationToken,
        text: &str,
    ) -> Result<PromptResult, SessionError> {
        if self.shutdown.is_cancelled() {
            return Err(SessionError::Closed);
        }
        if self.session.heartbeat_enabled() {
            self.session.enqueue_and_wait(cancel, text).await
        } else {
            self.session.prompt(cancel, text).await
        }
    }

    pub fn session(&self) -> &Arc<SessionInstance> {
        &self.session
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.session.transcript()
    }

    pub fn clear_transcript(&self) {
        self.session.clear_transcript();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop the drain loop and wait for it to exit. Idempotent.
    pub async fn close(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.heartbeat.take() {
            if let Err(e) = handle.await {
                error!("Heartbeat task failed: {}", e);
            }
            info!(parent: &self.session.span, "Local session closed");
        }
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
