use clawgate_providers::BackendError;
use thiserror::Error;

/// Errors surfaced by session instances and the registry.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session not started")]
    NotStarted,

    #[error("Backend error during {op}: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Runtime is closed")]
    Closed,

    #[error("Heartbeat processing stopped for this session")]
    HeartbeatStopped,
}

impl SessionError {
    pub fn backend(op: &'static str, source: BackendError) -> Self {
        SessionError::Backend { op, source }
    }
}

/// Reject blank input before it reaches a queue or a backend.
pub(crate) fn require_text(field: &str, value: &str) -> Result<(), SessionError> {
    if value.trim().is_empty() {
        return Err(SessionError::Validation(format!("{} must be non-empty", field)));
    }
    Ok(())
}
