//! TestWarden
//!
//! A cooperative test-execution sandbox. It watches for dangerous
//! operations performed by code under test (process termination, worker
//! spawning, filesystem and network access) and attributes each event to
//! the suite or case that was logically executing at the time, even when
//! the operation happens on a worker thread the test spawned. Violations
//! are recorded against the owning scope and surfaced as test failures
//! instead of crashing the run or going unnoticed.
//!
//! # Boundaries
//!
//! - Isolation is cooperative and best-effort: it catches accidental
//!   misbehavior in test code, not adversarial code.
//! - Filesystem and network checks carry a boolean signal only; there are
//!   no fine-grained allow-lists.
//! - Attribution relies on the worker-spawn convention
//!   ([`context::ContextHandle::spawn_worker`]); workers created outside
//!   it may only resolve to suite granularity, or not at all.

pub mod config;
pub mod context;
pub mod hook;
pub mod listener;
pub mod retry;
pub mod telemetry;
pub mod violation;

use std::sync::Arc;

pub use config::{ExitHandling, SandboxConfig, ThreadHandling};
pub use context::{ContextHandle, ContextKey, ContextRegistry, ScopeKind};
pub use hook::{GuardedOp, OperationCheck, SandboxSupervisor};
pub use listener::{FailureSink, SandboxListener, TestState};
pub use retry::{Fault, FaultKind, RetryOutcome, RetryingInvoker};
pub use violation::{HookError, Violation};

/// One sandbox instance: supervisor, listener, and retrying invoker wired
/// to a shared configuration. Lifecycle is bounded by one test-engine run.
pub struct Sandbox {
    supervisor: Arc<SandboxSupervisor>,
    listener: SandboxListener,
    invoker: RetryingInvoker,
}

impl Sandbox {
    /// Create a sandbox with the given configuration.
    pub fn new(config: SandboxConfig) -> Self {
        let invoker = RetryingInvoker::new(config.retries);
        let supervisor = Arc::new(SandboxSupervisor::new(config));
        let listener = SandboxListener::new(supervisor.clone());
        Self { supervisor, listener, invoker }
    }

    /// Create a sandbox configured from `TESTWARDEN_*` environment
    /// variables.
    pub fn from_env() -> Self {
        Self::new(config::load())
    }

    pub fn supervisor(&self) -> &Arc<SandboxSupervisor> {
        &self.supervisor
    }

    pub fn listener(&self) -> &SandboxListener {
        &self.listener
    }

    pub fn invoker(&self) -> &RetryingInvoker {
        &self.invoker
    }

    /// Install this sandbox's supervisor as the process-wide hook.
    pub fn install(&self) -> Result<(), HookError> {
        hook::install(self.supervisor.clone())
    }

    /// Tear down the process-wide hook after the last suite completes.
    pub fn uninstall(&self) -> Result<(), HookError> {
        hook::uninstall().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_wires_shared_config() {
        let config = SandboxConfig { retries: 3, ..Default::default() };
        let sandbox = Sandbox::new(config);
        assert_eq!(sandbox.invoker().retries(), 3);
        assert_eq!(sandbox.supervisor().config().retries, 3);
        assert!(Arc::ptr_eq(sandbox.supervisor(), sandbox.listener().supervisor()));
    }
}
