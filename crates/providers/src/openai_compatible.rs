use crate::traits::{Backend, BackendError};
use crate::types::{PromptMetadata, PromptRequest, PromptResult, TokenUsage};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// Chat-completions backend for OpenAI and API-compatible servers.
///
/// The API is stateless, so each session handle maps to a chat history
/// kept in memory and replayed on every prompt.
pub struct OpenAICompatibleBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    histories: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl OpenAICompatibleBackend {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            histories: Mutex::new(HashMap::new()),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(api_key) => request.bearer_auth(api_key),
            None => request,
        }
    }

    fn build_messages(&self, request: &PromptRequest) -> Result<Vec<ChatMessage>, BackendError> {
        let histories = self.histories.lock();
        let history = histories
            .get(&request.session)
            .ok_or_else(|| BackendError::Api(format!("Unknown session: {}", request.session)))?;

        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(ChatMessage::new("system", system));
        }
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::new("user", &request.text));
        Ok(messages)
    }
}

fn parse_usage(json: &Value) -> Option<TokenUsage> {
    let usage = json.get("usage")?;
    let count = |v: &Value| v.as_u64().unwrap_or(0);

    TokenUsage {
        input_tokens: count(&usage["prompt_tokens"]),
        output_tokens: count(&usage["completion_tokens"]),
        total_tokens: count(&usage["total_tokens"]),
        reasoning_tokens: count(&usage["completion_tokens_details"]["reasoning_tokens"]),
        cache_creation_tokens: count(&usage["prompt_tokens_details"]["cache_creation_tokens"]),
        cache_read_tokens: count(&usage["prompt_tokens_details"]["cached_tokens"]),
    }
    .reported()
}

fn parse_content(json: &Value) -> Result<String, BackendError> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| BackendError::Parse("No choices in response".to_string()))?;

    Ok(choice["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string())
}

#[async_trait]
impl Backend for OpenAICompatibleBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn health(&self) -> Result<(), BackendError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorize(self.client.get(&url).timeout(Duration::from_secs(10)))
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }

    async fn create_session(&self, title: &str) -> Result<String, BackendError> {
        let handle = Uuid::new_v4().to_string();
        self.histories.lock().insert(handle.clone(), Vec::new());
        debug!(title, handle = %handle, "chat session opened");
        Ok(handle)
    }

    async fn prompt(&self, request: &PromptRequest) -> Result<PromptResult, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let messages = self.build_messages(request)?;

        let body = json!({
            "model": request.model,
            "messages": messages,
        });

        let response = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{}: {}", status, text)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        let content = parse_content(&json)?;
        if content.is_empty() {
            warn!(session = %request.session, "backend returned empty content");
        }

        if let Some(history) = self.histories.lock().get_mut(&request.session) {
            history.push(ChatMessage::new("user", &request.text));
            history.push(ChatMessage::new("assistant", &content));
        }

        let model = json["model"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| request.model.clone());

        Ok(PromptResult::new(
            content,
            PromptMetadata {
                provider: self.name().to_string(),
                model,
                agent: request.agent.clone(),
                usage: parse_usage(&json),
                tool_events: Vec::new(),
            },
        ))
    }

    fn system_profile(&self, agent: &str) -> Option<String> {
        Some(format!(
            "You are {}, a helpful assistant reachable from several chat channels. Answer concisely.",
            agent
        ))
    }
}
