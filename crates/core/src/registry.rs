//! Conversation key to session instance routing.
//!
//! Two levels of locking:
//! - the map lock only protects key lookup and insertion of an empty slot;
//! - each instance has its own dispatch mutex held for a whole prompt.
//!
//! Calls on the same key are strictly ordered; calls on different keys
//! never wait on each other. Session bootstrap happens inside a per-key
//! `OnceCell`, so concurrent first use of a key creates exactly one backend
//! session without holding the map lock during the backend round trip.

use crate::error::{require_text, SessionError};
use crate::metrics::RuntimeMetrics;
use crate::session::{cancellable, SessionInstance, SessionOptions};
use clawgate_providers::{Backend, PromptResult};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};

struct SessionEntry {
    session: Arc<SessionInstance>,
    dispatch: tokio::sync::Mutex<()>,
}

type Slot = Arc<OnceCell<Arc<SessionEntry>>>;

/// Everything needed to bootstrap an instance, detached from the registry
/// borrow so bootstrap can run in its own task.
#[derive(Clone)]
struct SessionFactory {
    backend: Arc<dyn Backend>,
    template: SessionOptions,
    heartbeats: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown: CancellationToken,
    metrics: Arc<RuntimeMetrics>,
    span: Span,
}

impl SessionFactory {
    async fn create_entry(&self, key: &str) -> Result<Arc<SessionEntry>, SessionError> {
        let mut options = self.template.clone();
        options.title = key.to_string();
        if options.system_prompt.is_none() {
            options.system_prompt = self.backend.system_profile(&options.agent);
        }

        let span = info_span!(parent: &self.span, "session", key = %key);
        let session = Arc::new(
            SessionInstance::new(self.backend.clone(), options)
                .with_span(span.clone())
                .with_metrics(self.metrics.clone()),
        );
        session.start(&self.shutdown).await?;

        if session.heartbeat_enabled() {
            let loop_session = session.clone();
            let cancel = self.shutdown.child_token();
            let handle = tokio::spawn(
                async move {
                    if let Err(e) = loop_session.run_heartbeat(cancel).await {
                        error!(error = %e, "Heartbeat loop exited with error");
                    }
                }
                .instrument(span),
            );
            self.heartbeats.lock().push(handle);
        }

        info!(parent: &self.span, key, "Session registered");
        Ok(Arc::new(SessionEntry {
            session,
            dispatch: tokio::sync::Mutex::new(()),
        }))
    }
}

/// Lazily creates and owns one [`SessionInstance`] per conversation key.
pub struct SessionRegistry {
    factory: SessionFactory,
    sessions: RwLock<HashMap<String, Slot>>,
}

impl SessionRegistry {
    /// `template` is applied to every instance; its title is replaced by the
    /// conversation key.
    pub fn new(backend: Arc<dyn Backend>, template: SessionOptions) -> Self {
        Self {
            factory: SessionFactory {
                backend,
                template,
                heartbeats: Arc::new(Mutex::new(Vec::new())),
                shutdown: CancellationToken::new(),
                metrics: RuntimeMetrics::new(),
                span: info_span!("registry"),
            },
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.factory.span = span;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RuntimeMetrics>) -> Self {
        self.factory.metrics = metrics;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.factory.backend.name()
    }

    pub fn metrics(&self) -> Arc<RuntimeMetrics> {
        self.factory.metrics.clone()
    }

    /// Route one prompt to the conversation identified by `key`.
    ///
    /// Blank keys or prompts are rejected before anything is created or
    /// queued.
    pub async fn prompt(
        &self,
        cancel: &CancellationToken,
        key: &str,
        text: &str,
    ) -> Result<PromptResult, SessionError> {
        require_text("conversation key", key)?;
        require_text("prompt", text)?;

        let entry = self.resolve_or_create(cancel, key).await?;
        let _turn = cancellable(cancel, entry.dispatch.lock()).await?;
        // The registry may have closed while this caller waited its turn.
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        if entry.session.heartbeat_enabled() {
            entry.session.enqueue_and_wait(cancel, text).await
        } else {
            entry.session.prompt(cancel, text).await
        }
    }

    async fn resolve_or_create(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> Result<Arc<SessionEntry>, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let existing = self.sessions.read().get(key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut sessions = self.sessions.write();
                sessions
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone()
            }
        };
        if let Some(entry) = slot.get() {
            return Ok(entry.clone());
        }

        // Bootstrap runs in its own task so a caller giving up mid-way does
        // not abort a backend session that is already being created; the
        // next caller picks up the same initialization. A failed bootstrap
        // leaves the slot empty and the next caller retries.
        let factory = self.factory.clone();
        let key = key.to_string();
        let init = tokio::spawn(async move {
            slot.get_or_try_init(|| factory.create_entry(&key))
                .await
                .cloned()
        });

        match cancellable(cancel, init).await? {
            Ok(entry) => entry,
            Err(e) => {
                error!(parent: &self.factory.span, error = %e, "Session bootstrap task failed");
                Err(SessionError::Closed)
            }
        }
    }

    /// Instance for `key`, if one has been created.
    pub fn session(&self, key: &str) -> Option<Arc<SessionInstance>> {
        let slot = self.sessions.read().get(key).cloned()?;
        slot.get().map(|entry| entry.session.clone())
    }

    /// Keys with a live session.
    pub fn keys(&self) -> Vec<String> {
        let sessions = self.sessions.read();
        let mut keys: Vec<String> = sessions
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.factory.shutdown.is_cancelled()
    }

    /// Cancel every drain loop and forget all sessions. Idempotent.
    ///
    /// Does not wait for in-flight prompts; callers bound those with their
    /// own cancellation.
    pub fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.factory.shutdown.cancel();

        let dropped = {
            let mut sessions = self.sessions.write();
            let count = sessions.len();
            sessions.clear();
            count
        };
        let loops = std::mem::take(&mut *self.factory.heartbeats.lock()).len();
        debug!(parent: &self.factory.span, loops, "Heartbeat loops signalled");
        info!(parent: &self.factory.span, sessions = dropped, "Session registry closed");
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.factory.shutdown.cancel();
    }
}
