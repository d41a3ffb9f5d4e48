//! Transport adapters that feed a [`clawgate_bus::MessageHandler`].

pub mod terminal;
pub mod traits;

pub use terminal::TerminalTransport;
pub use traits::{Transport, TransportError};
