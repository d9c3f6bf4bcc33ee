//! Pulse analytics orchestrator.
//!
//! Captures a session snapshot, registers one adapter per configured backend,
//! queues tracked events and fans them out in batches with retries.

pub mod dispatcher;
pub mod hooks;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod session;
pub mod stats;
pub mod throttle;

pub use dispatcher::FlushReport;
pub use hooks::RuntimeError;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use session::{
    EnvironmentProvider, EnvironmentSnapshot, FileSessionStore, MemorySessionStore,
    ProcessEnvironment, SessionStore, StaticEnvironment,
};
pub use stats::{OrchestratorStats, SessionMetrics};
