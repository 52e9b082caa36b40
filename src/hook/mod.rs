//! Process-wide interception hook.
//!
//! [`SandboxSupervisor`] implements the operation-check contract the host
//! test engine invokes on every guarded operation. Each check resolves the
//! owning scope through the lookup engine, applies policy, records any
//! violation on the scope, and only then raises so the intercepted call
//! unwinds without completing. Composed inner checks are notified before
//! this layer denies ("notify, then deny").

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::config::SandboxConfig;
use crate::context::{
    ContextHandle, ContextKey, ContextRegistry, FrameTrace, StackFrameTrace,
};
use crate::telemetry::{log_sandbox_event, SandboxEvent};
use crate::violation::{HookError, Violation};

/// One guarded operation class, as reported by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardedOp {
    Exit { status: i32 },
    SpawnWorker,
    Read { path: PathBuf },
    Write { path: PathBuf },
    Connect { host: String, port: u16 },
}

impl GuardedOp {
    fn describe(&self) -> String {
        match self {
            Self::Exit { status } => format!("process exit with status {}", status),
            Self::SpawnWorker => "worker spawn".to_string(),
            Self::Read { path } => format!("file read of {}", path.display()),
            Self::Write { path } => format!("file write of {}", path.display()),
            Self::Connect { host, port } => format!("network connect to {}:{}", host, port),
        }
    }

    /// The event to log when this operation class is denied.
    fn blocked_event(&self) -> SandboxEvent {
        match self {
            Self::Exit { .. } => SandboxEvent::ExitBlocked,
            _ => SandboxEvent::OperationBlocked,
        }
    }

    fn attributed_violation(&self, key: &ContextKey) -> Violation {
        match self {
            Self::Exit { status } => {
                Violation::DisallowedExit { status: *status, scope: key.to_string() }
            }
            other => Violation::DisallowedOperation {
                operation: other.describe(),
                scope: key.to_string(),
            },
        }
    }

    fn unattributed_violation(&self) -> Violation {
        match self {
            Self::Exit { status } => Violation::UnattributedExit { status: *status },
            other => Violation::Unattributed { operation: other.describe() },
        }
    }
}

/// The narrow check contract a host runtime (or a composed security layer)
/// implements. Each check either passes silently or returns the violation
/// to raise.
pub trait OperationCheck: Send + Sync {
    fn check(&self, op: &GuardedOp) -> Result<(), Violation>;
}

/// Process-wide sandbox supervisor: lookup engine plus policy enforcement.
pub struct SandboxSupervisor {
    config: SandboxConfig,
    registry: ContextRegistry,
    frames: Box<dyn FrameTrace>,
    inner: Option<Box<dyn OperationCheck>>,
}

impl SandboxSupervisor {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            registry: ContextRegistry::new(),
            frames: Box::new(StackFrameTrace),
            inner: None,
        }
    }

    /// Replace the execution-frame trace provider used by the coarsest
    /// lookup tier.
    pub fn with_frame_trace(mut self, frames: Box<dyn FrameTrace>) -> Self {
        self.frames = frames;
        self
    }

    /// Compose an inner check that is notified of every guarded operation
    /// before this layer applies its own policy.
    pub fn with_inner_check(mut self, inner: Box<dyn OperationCheck>) -> Self {
        self.inner = Some(inner);
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    // ---- operation checks ----

    pub fn check_exit(&self, status: i32) -> Result<(), Violation> {
        self.enforce(GuardedOp::Exit { status })
    }

    pub fn check_worker_spawn(&self) -> Result<(), Violation> {
        self.enforce(GuardedOp::SpawnWorker)
    }

    pub fn check_read(&self, path: impl Into<PathBuf>) -> Result<(), Violation> {
        self.enforce(GuardedOp::Read { path: path.into() })
    }

    pub fn check_write(&self, path: impl Into<PathBuf>) -> Result<(), Violation> {
        self.enforce(GuardedOp::Write { path: path.into() })
    }

    pub fn check_connect(&self, host: &str, port: u16) -> Result<(), Violation> {
        self.enforce(GuardedOp::Connect { host: host.to_string(), port })
    }

    /// Shared resolve-then-record path for every operation class. Adding a
    /// policy for a currently-allowed class changes [`Self::denies`] only.
    fn enforce(&self, op: GuardedOp) -> Result<(), Violation> {
        if let Some(inner) = &self.inner {
            inner.check(&op)?;
        }

        let resolved = self.registry.resolve(self.frames.as_ref());
        if !self.denies(&op) {
            return Ok(());
        }

        match resolved {
            Some(context) => {
                let violation = op.attributed_violation(context.key());
                context.record_violation(violation.clone());
                log_sandbox_event(
                    op.blocked_event(),
                    &violation.to_string(),
                    &[("scope", &context.key().to_string())],
                );
                Err(violation)
            }
            None => {
                let violation = op.unattributed_violation();
                log_sandbox_event(
                    SandboxEvent::AttributionMiss,
                    &violation.to_string(),
                    &[("thread", std::thread::current().name().unwrap_or("<unnamed>"))],
                );
                Err(violation)
            }
        }
    }

    fn denies(&self, op: &GuardedOp) -> bool {
        match op {
            GuardedOp::Exit { .. } => self.config.disallows_exit(),
            // Policy-stubbed: allowed, but resolved like everything else.
            GuardedOp::SpawnWorker
            | GuardedOp::Read { .. }
            | GuardedOp::Write { .. }
            | GuardedOp::Connect { .. } => false,
        }
    }

    // ---- lifecycle delegation ----

    pub fn start_suite(&self, class_name: &str) -> ContextHandle {
        self.registry.start_suite(&ContextKey::suite(class_name))
    }

    pub fn start_test(&self, class_name: &str, method_name: &str) -> ContextHandle {
        self.registry.start_test(&ContextKey::case(class_name, method_name))
    }

    pub fn end_test(&self) {
        self.registry.end_test();
    }

    pub fn end_suite(&self) {
        self.registry.end_suite();
    }

    pub fn context_for(&self, key: &ContextKey) -> Option<ContextHandle> {
        self.registry.context_for(key)
    }

    pub fn any_has_active_workers(&self) -> bool {
        self.registry.any_has_active_workers()
    }

    /// Run class-level code with a suite context set, ending it on every
    /// path.
    pub fn with_suite<R>(&self, class_name: &str, f: impl FnOnce() -> R) -> R {
        self.start_suite(class_name);
        let _end = EndScope { registry: &self.registry };
        f()
    }

    /// Run a case body with a case context set, ending it on every path.
    pub fn with_case<R>(&self, class_name: &str, method_name: &str, f: impl FnOnce() -> R) -> R {
        self.start_test(class_name, method_name);
        let _end = EndScope { registry: &self.registry };
        f()
    }

    /// Whether live workers at scope end fail a scope of this kind.
    pub fn disallows_workers_for(&self, context: &ContextHandle) -> bool {
        self.config.disallows_dangling_for(context.kind())
    }

    /// Whether dangling enforcement happens at suite granularity.
    pub fn suite_granularity(&self) -> bool {
        self.config.thread_handling.suite_granularity()
    }

    /// Ask every lingering worker to stop, then wait up to the configured
    /// grace period for them to drain. Cooperative: workers that never poll
    /// their group's interrupt flag will still be reported as dangling.
    ///
    /// Returns true if no workers remain.
    pub fn interrupt_dangling_workers(&self) -> bool {
        if !self.registry.any_has_active_workers() {
            return true;
        }

        let mut interrupted = 0usize;
        for suite in self.registry.suites() {
            if suite.has_active_workers() {
                suite.request_interrupt();
                interrupted += 1;
            }
        }
        log_sandbox_event(
            SandboxEvent::WorkersInterrupted,
            "asked dangling workers to stop",
            &[("suites", &interrupted.to_string())],
        );

        let deadline = Instant::now() + self.config.interrupt_grace;
        while self.registry.any_has_active_workers() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl OperationCheck for SandboxSupervisor {
    fn check(&self, op: &GuardedOp) -> Result<(), Violation> {
        self.enforce(op.clone())
    }
}

/// Clears the calling worker's current-context slot on drop, so scope ends
/// survive panicking case bodies.
struct EndScope<'a> {
    registry: &'a ContextRegistry,
}

impl Drop for EndScope<'_> {
    fn drop(&mut self) {
        self.registry.end_test();
    }
}

// ---- process-wide installation ----

static INSTALLED: RwLock<Option<Arc<SandboxSupervisor>>> = RwLock::new(None);

/// Install the supervisor as the process-wide hook. Must happen before any
/// suite runs.
pub fn install(supervisor: Arc<SandboxSupervisor>) -> Result<(), HookError> {
    let mut slot = INSTALLED.write();
    if slot.is_some() {
        return Err(HookError::AlreadyInstalled);
    }
    *slot = Some(supervisor);
    Ok(())
}

/// Remove and return the installed supervisor after the last suite ends.
pub fn uninstall() -> Result<Arc<SandboxSupervisor>, HookError> {
    INSTALLED.write().take().ok_or(HookError::NotInstalled)
}

/// The currently installed supervisor, if any.
pub fn installed() -> Option<Arc<SandboxSupervisor>> {
    INSTALLED.read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExitHandling, ThreadHandling};
    use crate::context::NoFrameTrace;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn disallow_exit_config() -> SandboxConfig {
        SandboxConfig { exit_handling: ExitHandling::Disallow, ..Default::default() }
    }

    fn supervisor(config: SandboxConfig) -> SandboxSupervisor {
        SandboxSupervisor::new(config).with_frame_trace(Box::new(NoFrameTrace))
    }

    #[test]
    fn test_blocked_event_follows_operation_class() {
        assert_eq!(GuardedOp::Exit { status: 1 }.blocked_event(), SandboxEvent::ExitBlocked);
        assert_eq!(GuardedOp::SpawnWorker.blocked_event(), SandboxEvent::OperationBlocked);
        assert_eq!(
            GuardedOp::Connect { host: "localhost".into(), port: 80 }.blocked_event(),
            SandboxEvent::OperationBlocked
        );
    }

    #[test]
    fn test_exit_blocked_and_recorded_on_case() {
        let sup = supervisor(disallow_exit_config());
        sup.start_suite("Foo");
        let case = sup.start_test("Foo", "test");

        let err = sup.check_exit(1).unwrap_err();
        assert!(err.is_attributed());
        assert_eq!(case.first_failure(), Some(err));
        sup.end_test();
    }

    #[test]
    fn test_exit_without_context_is_unattributed_not_silent() {
        let sup = supervisor(disallow_exit_config());
        let err = sup.check_exit(7).unwrap_err();
        assert_eq!(err, Violation::UnattributedExit { status: 7 });
    }

    #[test]
    fn test_exit_allowed_when_policy_allows() {
        let config = SandboxConfig { exit_handling: ExitHandling::Allow, ..Default::default() };
        let sup = supervisor(config);
        sup.start_test("Foo", "test");
        assert!(sup.check_exit(0).is_ok());
        sup.end_test();
    }

    #[test]
    fn test_stubbed_operations_pass() {
        let sup = supervisor(disallow_exit_config());
        sup.start_test("Foo", "test");
        assert!(sup.check_read("/tmp/file").is_ok());
        assert!(sup.check_write("/tmp/file").is_ok());
        assert!(sup.check_connect("localhost", 80).is_ok());
        assert!(sup.check_worker_spawn().is_ok());
        sup.end_test();
    }

    #[test]
    fn test_inner_check_notified_before_deny() {
        struct Recording(Arc<AtomicUsize>);
        impl OperationCheck for Recording {
            fn check(&self, _op: &GuardedOp) -> Result<(), Violation> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let seen = Arc::new(AtomicUsize::new(0));
        let sup = supervisor(disallow_exit_config())
            .with_inner_check(Box::new(Recording(seen.clone())));
        sup.start_test("Foo", "test");

        assert!(sup.check_exit(1).is_err());
        assert!(sup.check_read("/tmp/x").is_ok());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        sup.end_test();
    }

    #[test]
    fn test_with_case_ends_scope_on_panic() {
        let sup = Arc::new(supervisor(disallow_exit_config()));
        let sup_clone = sup.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            sup_clone.with_case("Foo", "test", || panic!("case body died"));
        }));
        assert!(result.is_err());
        assert!(sup.registry().current_context().is_none());
    }

    #[test]
    fn test_interrupt_drains_cooperative_worker() {
        let config = SandboxConfig {
            thread_handling: ThreadHandling::DisallowDanglingSuiteThreads,
            interrupt_grace: Duration::from_millis(500),
            ..Default::default()
        };
        let sup = supervisor(config);
        let case = sup.start_test("Foo", "test");
        sup.end_test();

        let group = case.group().clone();
        let handle = case
            .spawn_worker(move || {
                while !group.interrupt_requested() {
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();

        assert!(sup.any_has_active_workers());
        assert!(sup.interrupt_dangling_workers());
        assert!(!sup.any_has_active_workers());
        handle.join().unwrap();
    }

    #[test]
    fn test_interrupt_gives_up_on_uncooperative_worker() {
        let config = SandboxConfig {
            interrupt_grace: Duration::from_millis(20),
            ..Default::default()
        };
        let sup = supervisor(config);
        let case = sup.start_test("Foo", "test");
        sup.end_test();

        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let handle = case
            .spawn_worker(move || {
                // Ignores the interrupt flag until released.
                rx.recv().unwrap();
            })
            .unwrap();

        assert!(!sup.interrupt_dangling_workers());
        tx.send(()).unwrap();
        handle.join().unwrap();
    }

    // Serializes the install/uninstall test against the process-wide slot.
    static INSTALL_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_install_is_exclusive() {
        let _lock = INSTALL_LOCK.lock().unwrap();
        let first = Arc::new(supervisor(disallow_exit_config()));
        let second = Arc::new(supervisor(disallow_exit_config()));

        install(first.clone()).unwrap();
        assert!(installed().is_some());
        assert!(matches!(install(second), Err(HookError::AlreadyInstalled)));

        let removed = uninstall().unwrap();
        assert!(Arc::ptr_eq(&removed, &first));
        assert!(installed().is_none());
        assert!(matches!(uninstall(), Err(HookError::NotInstalled)));
    }
}
