//! In-process message transport for the Clawgate runtime.
//!
//! Bounded inbound/outbound queues give backpressure between transport
//! adapters and the worker that drives prompts; a separate best-effort
//! broadcast stream carries lifecycle events for observability.

pub mod bus;
pub mod error;
pub mod handler;
pub mod types;

pub use bus::{EventSubscription, MessageBus, Unsubscribe, DEFAULT_EVENT_BUFFER, DEFAULT_QUEUE_CAPACITY};
pub use error::BusError;
pub use handler::{handler_fn, FnHandler, MessageHandler};
pub use types::{Event, EventKind, InboundMessage, Metadata, OutboundMessage};

pub use tokio_util::sync::CancellationToken;
