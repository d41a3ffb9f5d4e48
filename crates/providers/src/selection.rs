//! Startup-time choice of backend variant.

use crate::echo::EchoBackend;
use crate::openai_compatible::OpenAICompatibleBackend;
use crate::traits::{Backend, BackendError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Echo,
    OpenAI,
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "echo" => Ok(BackendKind::Echo),
            "openai" => Ok(BackendKind::OpenAI),
            other => Err(BackendError::Unavailable(format!("Unknown backend: {}", other))),
        }
    }
}

/// What is needed to construct any backend variant.
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub endpoint: String,
    pub api_key: Option<String>,
}

pub fn build_backend(settings: &BackendSettings) -> Arc<dyn Backend> {
    info!("Using backend: {:?}", settings.kind);
    match settings.kind {
        BackendKind::Echo => Arc::new(EchoBackend::new()),
        BackendKind::OpenAI => Arc::new(OpenAICompatibleBackend::new(
            settings.endpoint.clone(),
            settings.api_key.clone(),
        )),
    }
}
