//! Offline loopback backend.

use crate::traits::{Backend, BackendError};
use crate::types::{PromptMetadata, PromptRequest, PromptResult};
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

/// Replies `ok:<text>` without touching the network.
#[derive(Debug, Default, Clone)]
pub struct EchoBackend;

impl EchoBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn health(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn create_session(&self, title: &str) -> Result<String, BackendError> {
        let handle = Uuid::new_v4().to_string();
        debug!(title, handle = %handle, "echo session created");
        Ok(handle)
    }

    async fn prompt(&self, request: &PromptRequest) -> Result<PromptResult, BackendError> {
        Ok(PromptResult::new(
            format!("ok:{}", request.text),
            PromptMetadata {
                provider: "echo".to_string(),
                model: request.model.clone(),
                agent: request.agent.clone(),
                ..PromptMetadata::default()
            },
        ))
    }

    fn system_profile(&self, agent: &str) -> Option<String> {
        Some(format!("You are {}, a loopback agent.", agent))
    }
}
