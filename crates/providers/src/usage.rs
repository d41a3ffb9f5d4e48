//! Flattening of prompt metadata into string-keyed message metadata.
//!
//! Usage counters are written one key per counter and only when at least
//! one counter is non-zero. Decoding is lenient: a malformed number reads
//! as zero.

use crate::types::{PromptMetadata, TokenUsage, ToolEvent};
use std::collections::HashMap;
use tracing::warn;

pub const PROVIDER_KEY: &str = "provider";
pub const MODEL_KEY: &str = "model";
pub const AGENT_KEY: &str = "agent";
pub const TOOL_EVENTS_KEY: &str = "tool_events";

pub const INPUT_TOKENS_KEY: &str = "usage_input_tokens";
pub const OUTPUT_TOKENS_KEY: &str = "usage_output_tokens";
pub const TOTAL_TOKENS_KEY: &str = "usage_total_tokens";
pub const REASONING_TOKENS_KEY: &str = "usage_reasoning_tokens";
pub const CACHE_CREATION_TOKENS_KEY: &str = "usage_cache_creation_tokens";
pub const CACHE_READ_TOKENS_KEY: &str = "usage_cache_read_tokens";

const USAGE_KEYS: [&str; 6] = [
    INPUT_TOKENS_KEY,
    OUTPUT_TOKENS_KEY,
    TOTAL_TOKENS_KEY,
    REASONING_TOKENS_KEY,
    CACHE_CREATION_TOKENS_KEY,
    CACHE_READ_TOKENS_KEY,
];

fn counters(usage: &TokenUsage) -> [u64; 6] {
    [
        usage.input_tokens,
        usage.output_tokens,
        usage.total_tokens,
        usage.reasoning_tokens,
        usage.cache_creation_tokens,
        usage.cache_read_tokens,
    ]
}

/// Write `usage` into `metadata`. Absent or all-zero usage writes nothing.
pub fn encode_usage(usage: Option<&TokenUsage>, metadata: &mut HashMap<String, String>) {
    let Some(usage) = usage.filter(|u| !u.is_zero()) else {
        return;
    };

    for (key, value) in USAGE_KEYS.iter().zip(counters(usage)) {
        metadata.insert((*key).to_string(), value.to_string());
    }
}

/// Read usage back out of `metadata`; `None` when nothing non-zero is present.
pub fn decode_usage(metadata: &HashMap<String, String>) -> Option<TokenUsage> {
    let read = |key: &str| -> u64 {
        metadata
            .get(key)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(0)
    };

    TokenUsage {
        input_tokens: read(INPUT_TOKENS_KEY),
        output_tokens: read(OUTPUT_TOKENS_KEY),
        total_tokens: read(TOTAL_TOKENS_KEY),
        reasoning_tokens: read(REASONING_TOKENS_KEY),
        cache_creation_tokens: read(CACHE_CREATION_TOKENS_KEY),
        cache_read_tokens: read(CACHE_READ_TOKENS_KEY),
    }
    .reported()
}

/// Flatten identity, usage and tool events into string metadata.
pub fn encode_metadata(meta: &PromptMetadata) -> HashMap<String, String> {
    let mut out = HashMap::new();
    out.insert(PROVIDER_KEY.to_string(), meta.provider.clone());
    out.insert(MODEL_KEY.to_string(), meta.model.clone());
    out.insert(AGENT_KEY.to_string(), meta.agent.clone());
    encode_usage(meta.usage.as_ref(), &mut out);

    if !meta.tool_events.is_empty() {
        match serde_json::to_string(&meta.tool_events) {
            Ok(json) => {
                out.insert(TOOL_EVENTS_KEY.to_string(), json);
            }
            Err(e) => warn!("Failed to serialize tool events: {}", e),
        }
    }

    out
}

/// Inverse of [`encode_metadata`]. Malformed tool-event JSON decodes as no events.
pub fn decode_metadata(metadata: &HashMap<String, String>) -> PromptMetadata {
    let field = |key: &str| metadata.get(key).cloned().unwrap_or_default();

    let tool_events = metadata
        .get(TOOL_EVENTS_KEY)
        .and_then(|raw| serde_json::from_str::<Vec<ToolEvent>>(raw).ok())
        .unwrap_or_default();

    PromptMetadata {
        provider: field(PROVIDER_KEY),
        model: field(MODEL_KEY),
        agent: field(AGENT_KEY),
        usage: decode_usage(metadata),
        tool_events,
    }
}
