//! Telemetry for the test-execution sandbox.
//!
//! Structured logging plus a sandbox event log for interception outcomes.
//! All output goes through `tracing`; no network dependencies.

mod events;
mod logging;

pub use events::{log_sandbox_event, SandboxEvent, SandboxSeverity};
pub use logging::{init_logging, LogConfig, LogError, LogFormat};
