//! Messages and events carried by the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque string-keyed metadata attached to messages and events.
pub type Metadata = HashMap<String, String>;

/// A prompt arriving from a transport adapter or a local entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub transport: String,
    pub sender_id: String,
    pub chat_id: String,
    #[serde(default)]
    pub conversation_key: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl InboundMessage {
    pub fn new(
        transport: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            transport: transport.into(),
            sender_id: String::new(),
            chat_id: chat_id.into(),
            conversation_key: String::new(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    pub fn with_conversation_key(mut self, key: impl Into<String>) -> Self {
        self.conversation_key = key.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Key identifying the conversation this message belongs to.
    ///
    /// Falls back to `transport:chat_id` when the adapter did not set one.
    pub fn session_key(&self) -> String {
        if self.conversation_key.trim().is_empty() {
            format!("{}:{}", self.transport, self.chat_id)
        } else {
            self.conversation_key.clone()
        }
    }
}

/// A reply headed back to the originating adapter or caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub transport: String,
    pub chat_id: String,
    pub conversation_key: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl OutboundMessage {
    /// Successful reply addressed to the sender of `inbound`.
    pub fn reply_to(inbound: &InboundMessage, content: impl Into<String>) -> Self {
        Self {
            transport: inbound.transport.clone(),
            chat_id: inbound.chat_id.clone(),
            conversation_key: inbound.session_key(),
            content: content.into(),
            error: None,
            metadata: Metadata::new(),
        }
    }

    /// Failed reply: empty content, error string only.
    pub fn failure(inbound: &InboundMessage, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::reply_to(inbound, String::new())
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Lifecycle event kinds published on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PromptReceived,
    PromptCompleted,
    PromptFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PromptReceived => "prompt_received",
            EventKind::PromptCompleted => "prompt_completed",
            EventKind::PromptFailed => "prompt_failed",
        }
    }
}

/// Fire-and-forget observability record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub transport: String,
    pub chat_id: String,
    pub conversation_key: String,
    pub request_id: String,
    #[serde(default)]
    pub payload: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, inbound: &InboundMessage, request_id: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            transport: inbound.transport.clone(),
            chat_id: inbound.chat_id.clone(),
            conversation_key: inbound.session_key(),
            request_id: request_id.into(),
            payload: Metadata::new(),
            error: None,
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
