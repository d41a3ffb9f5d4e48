use serde::{Deserialize, Serialize};

/// One prompt against an existing backend session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub session: String,
    pub text: String,
    pub model: String,
    pub agent: String,
    pub system_prompt: Option<String>,
}

/// Token counters reported by a backend.
///
/// An all-zero value means "not reported".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    pub fn is_zero(&self) -> bool {
        *self == TokenUsage::default()
    }

    /// `None` for an all-zero value.
    pub fn reported(self) -> Option<Self> {
        if self.is_zero() {
            None
        } else {
            Some(self)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEventKind {
    Call,
    Result,
}

/// Tool call or result notice emitted while the backend runs tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEvent {
    pub kind: ToolEventKind,
    pub tool: String,
    #[serde(default)]
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Backend, model and agent identity plus optional usage and tool activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMetadata {
    pub provider: String,
    pub model: String,
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_events: Vec<ToolEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptResult {
    pub text: String,
    pub metadata: PromptMetadata,
}

impl PromptResult {
    pub fn new(text: impl Into<String>, metadata: PromptMetadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_usage_is_not_reported() {
        assert!(TokenUsage::default().is_zero());
        assert_eq!(TokenUsage::default().reported(), None);

        let usage = TokenUsage {
            output_tokens: 3,
            ..TokenUsage::default()
        };
        assert_eq!(usage.reported(), Some(usage));
    }

    #[test]
    fn test_tool_event_json_format() {
        let event = ToolEvent {
            kind: ToolEventKind::Call,
            tool: "read_file".to_string(),
            payload: r#"{"path":"a.txt"}"#.to_string(),
            duration_ms: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "call");
        assert_eq!(json["tool"], "read_file");
        assert!(json.get("duration_ms").is_none());
    }
}
