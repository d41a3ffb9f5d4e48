//! Clawgate concurrency and session-routing core.
//!
//! A [`SessionInstance`] owns one conversation's backend session and
//! transcript, optionally fed by a heartbeat drain loop. The
//! [`SessionRegistry`] maps conversation keys to instances, serializing
//! prompts per key while letting different keys run in parallel.

pub mod error;
pub mod gateway;
pub mod heartbeat;
pub mod local;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod transcript;
pub mod worker;

pub use error::SessionError;
pub use gateway::GatewayHandler;
pub use local::LocalSession;
pub use metrics::{MetricsSnapshot, RuntimeMetrics};
pub use registry::SessionRegistry;
pub use session::{SessionInstance, SessionOptions, SessionPhase};
pub use transcript::{Role, Transcript, TranscriptEntry};
pub use worker::{run_bus_worker, BusWorker};
