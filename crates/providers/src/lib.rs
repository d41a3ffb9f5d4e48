//! LLM backend capability and its interchangeable variants.

pub mod echo;
pub mod openai_compatible;
pub mod selection;
pub mod traits;
pub mod types;
pub mod usage;

pub use echo::EchoBackend;
pub use openai_compatible::OpenAICompatibleBackend;
pub use selection::{build_backend, BackendKind, BackendSettings};
pub use traits::{Backend, BackendError};
pub use types::{PromptMetadata, PromptRequest, PromptResult, TokenUsage, ToolEvent, ToolEventKind};
pub use usage::{decode_metadata, decode_usage, encode_metadata, encode_usage};
