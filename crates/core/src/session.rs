//! One conversation's execution context.

use crate::error::{require_text, SessionError};
use crate::metrics::RuntimeMetrics;
use crate::transcript::{Role, Transcript, TranscriptEntry};
use clawgate_providers::{Backend, PromptRequest, PromptResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument, Span};

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Title passed to the backend when the session is created.
    pub title: String,
    pub model: String,
    pub agent: String,
    pub system_prompt: Option<String>,
    /// `Some(interval)` turns on heartbeat mode.
    pub heartbeat: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            title: "clawgate".to_string(),
            model: String::new(),
            agent: "default".to_string(),
            system_prompt: None,
            heartbeat: None,
        }
    }
}

impl SessionOptions {
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Active,
}

pub(crate) type ResultSlot = oneshot::Sender<Result<PromptResult, SessionError>>;

pub(crate) struct QueuedPrompt {
    pub(crate) text: String,
    pub(crate) reply: Option<ResultSlot>,
}

pub(crate) struct SessionState {
    pub(crate) handle: Option<String>,
    pub(crate) transcript: Transcript,
    pub(crate) pending: VecDeque<QueuedPrompt>,
    pub(crate) heartbeat_halted: bool,
    /// The drain loop was cancelled; nothing will drain the queue again.
    pub(crate) heartbeat_closed: bool,
}

/// Backend session handle, transcript and (in heartbeat mode) pending queue
/// for a single conversation.
pub struct SessionInstance {
    backend: Arc<dyn Backend>,
    options: SessionOptions,
    pub(crate) state: Mutex<SessionState>,
    /// Held for the duration of every backend prompt.
    exec: tokio::sync::Mutex<()>,
    /// Capacity-one wake signal for the drain loop.
    pub(crate) wake: Notify,
    pub(crate) metrics: Arc<RuntimeMetrics>,
    pub(crate) span: Span,
}

/// Race `fut` against `cancel`; cancellation wins ties.
pub(crate) async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, SessionError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        out = fut => Ok(out),
    }
}

impl SessionInstance {
    pub fn new(backend: Arc<dyn Backend>, options: SessionOptions) -> Self {
        let span = info_span!("session", title = %options.title);
        Self {
            backend,
            options,
            state: Mutex::new(SessionState {
                handle: None,
                transcript: Transcript::new(),
                pending: VecDeque::new(),
                heartbeat_halted: false,
                heartbeat_closed: false,
            }),
            exec: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
            metrics: RuntimeMetrics::new(),
            span,
        }
    }

    /// Log through `span` instead of a span of our own.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RuntimeMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn phase(&self) -> SessionPhase {
        if self.state.lock().handle.is_some() {
            SessionPhase::Active
        } else {
            SessionPhase::Uninitialized
        }
    }

    /// Backend session handle, once started.
    pub fn handle(&self) -> Option<String> {
        self.state.lock().handle.clone()
    }

    pub fn heartbeat_enabled(&self) -> bool {
        self.options.heartbeat.is_some()
    }

    /// Heartbeat mode is on and its drain loop has neither halted nor been
    /// shut down.
    pub fn heartbeat_running(&self) -> bool {
        let state = self.state.lock();
        self.heartbeat_enabled() && !state.heartbeat_halted && !state.heartbeat_closed
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.state.lock().transcript.entries().to_vec()
    }

    pub fn clear_transcript(&self) {
        self.state.lock().transcript.clear();
    }

    /// Health-check the backend, then open a backend session.
    ///
    /// Either failure is returned as is; nothing is retried. Calling this on
    /// an active instance is a no-op. Concurrent calls are serialized, so
    /// only one backend session is ever created.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        if self.phase() == SessionPhase::Active {
            return Ok(());
        }

        async {
            let _exec = cancellable(cancel, self.exec.lock()).await?;
            if self.phase() == SessionPhase::Active {
                return Ok(());
            }

            cancellable(cancel, self.backend.health())
                .await?
                .map_err(|e| SessionError::backend("health", e))?;

            let handle = cancellable(cancel, self.backend.create_session(&self.options.title))
                .await?
                .map_err(|e| SessionError::backend("create_session", e))?;

            info!(handle = %handle, backend = self.backend.name(), "Session started");
            self.state.lock().handle = Some(handle);
            self.metrics.session_created();
            Ok::<(), SessionError>(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Run one prompt inline against the backend.
    ///
    /// On success a user turn and an assistant turn are appended to the
    /// transcript.
    pub async fn prompt(
        &self,
        cancel: &CancellationToken,
        text: &str,
    ) -> Result<PromptResult, SessionError> {
        require_text("prompt", text)?;
        let session = self.handle().ok_or(SessionError::NotStarted)?;

        async {
            let _exec = cancellable(cancel, self.exec.lock()).await?;

            let request = PromptRequest {
                session,
                text: text.to_string(),
                model: self.options.model.clone(),
                agent: self.options.agent.clone(),
                system_prompt: self.options.system_prompt.clone(),
            };

            debug!(chars = text.len(), "Sending prompt");
            let started = Instant::now();
            match cancellable(cancel, self.backend.prompt(&request)).await? {
                Ok(result) => {
                    {
                        let mut state = self.state.lock();
                        state.transcript.append(Role::User, text);
                        state.transcript.append(Role::Assistant, result.text.clone());
                    }
                    self.metrics.prompt_completed(started.elapsed());
                    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Prompt completed");
                    Ok(result)
                }
                Err(e) => {
                    self.metrics.prompt_failed();
                    Err(SessionError::backend("prompt", e))
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Queue a prompt for the drain loop without waiting for its result.
    pub fn enqueue(&self, text: &str) -> Result<(), SessionError> {
        self.push_pending(text, None)
    }

    /// Queue a prompt for the drain loop and wait for its result.
    ///
    /// If `cancel` fires first the caller gets `Cancelled`; an item the loop
    /// has not started yet is then skipped rather than executed.
    pub async fn enqueue_and_wait(
        &self,
        cancel: &CancellationToken,
        text: &str,
    ) -> Result<PromptResult, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.push_pending(text, Some(tx))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            outcome = rx => outcome.unwrap_or(Err(SessionError::HeartbeatStopped)),
        }
    }

    fn push_pending(&self, text: &str, reply: Option<ResultSlot>) -> Result<(), SessionError> {
        require_text("prompt", text)?;
        if !self.heartbeat_enabled() {
            return Err(SessionError::Validation(
                "heartbeat mode is not enabled for this session".to_string(),
            ));
        }

        {
            let mut state = self.state.lock();
            if state.handle.is_none() {
                return Err(SessionError::NotStarted);
            }
            if state.heartbeat_closed {
                return Err(SessionError::Closed);
            }
            if state.heartbeat_halted {
                return Err(SessionError::HeartbeatStopped);
            }
            state.pending.push_back(QueuedPrompt {
                text: text.to_string(),
                reply,
            });
        }

        self.metrics.prompt_queued();
        self.wake.notify_one();
        Ok(())
    }
}
