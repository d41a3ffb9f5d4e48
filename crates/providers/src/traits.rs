use crate::types::{PromptRequest, PromptResult};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Capability contract every LLM backend variant implements.
///
/// Retry policy, if any, lives inside the implementation; callers never retry.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    async fn health(&self) -> Result<(), BackendError>;

    /// Open a new backend-side session and return its opaque handle.
    async fn create_session(&self, title: &str) -> Result<String, BackendError>;

    async fn prompt(&self, request: &PromptRequest) -> Result<PromptResult, BackendError>;

    /// Backend-specific default system profile for `agent`.
    fn system_profile(&self, _agent: &str) -> Option<String> {
        None
    }
}
