use thiserror::Error;

/// Errors surfaced by the message bus and by message handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Bus is closed")]
    Closed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Handler error: {0}")]
    Handler(String),
}
