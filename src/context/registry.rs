//! Context registry and lookup engine.
//!
//! Owns every suite context for the lifetime of a run and resolves the
//! scope an arbitrary operation belongs to. Resolution is best-effort and
//! runs three tiers, each cheaper than the next:
//!
//! 1. the calling worker's current-context slot (set by `start_*`);
//! 2. the calling worker's thread name, which the spawn convention sets to
//!    the owning group name;
//! 3. a scan of an execution-frame trace for a registered suite class.
//!
//! A miss on all three means the operation cannot be attributed; callers
//! must surface that, not swallow it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::{CaseContext, ContextHandle, ContextKey, SuiteContext};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Keyed by registry id so tests can run fresh registries on one thread.
    static CURRENT: RefCell<HashMap<u64, ContextHandle>> = RefCell::new(HashMap::new());
}

/// Source of execution-frame names for the coarsest lookup tier.
///
/// The default provider captures a stack trace; tests substitute a
/// deterministic implementation.
pub trait FrameTrace: Send + Sync {
    fn frames(&self) -> Vec<String>;
}

/// Provider that never yields frames. Disables the stack-walk tier.
pub struct NoFrameTrace;

impl FrameTrace for NoFrameTrace {
    fn frames(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Provider backed by a captured stack trace of the calling thread.
///
/// Frame symbolication is best-effort; the tier only resolves to suite
/// granularity and only when a registered class name appears in a frame.
pub struct StackFrameTrace;

impl FrameTrace for StackFrameTrace {
    fn frames(&self) -> Vec<String> {
        let captured = std::backtrace::Backtrace::force_capture();
        captured.to_string().lines().map(|line| line.trim().to_string()).collect()
    }
}

/// Process-wide mapping from class name to suite context, plus the
/// per-worker current-context slot.
pub struct ContextRegistry {
    id: u64,
    suites: DashMap<String, Arc<SuiteContext>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::SeqCst),
            suites: DashMap::new(),
        }
    }

    /// Create (or replace) the suite context for the key's class and make it
    /// the calling worker's current context.
    pub fn start_suite(&self, key: &ContextKey) -> ContextHandle {
        let suite = Arc::new(SuiteContext::new(key.class_name()));
        self.suites.insert(key.class_name().to_string(), suite.clone());
        let handle = ContextHandle::Suite(suite);
        self.set_current(handle.clone());
        handle
    }

    /// Create a case context under the key's suite and make it the calling
    /// worker's current context.
    ///
    /// Self-healing: a missing suite is created implicitly, so class-level
    /// code that never announced the suite still gets attributed.
    pub fn start_test(&self, key: &ContextKey) -> ContextHandle {
        let suite = self
            .suites
            .entry(key.class_name().to_string())
            .or_insert_with(|| Arc::new(SuiteContext::new(key.class_name())))
            .clone();

        let case = Arc::new(CaseContext::new(key.clone()));
        suite.add_child(case.clone());
        let handle = ContextHandle::Case(case);
        self.set_current(handle.clone());
        handle
    }

    /// Clear the calling worker's current-context slot. The context object
    /// itself stays registered for later aggregation.
    pub fn end_test(&self) {
        self.clear_current();
    }

    /// Clear the calling worker's current-context slot at suite end.
    pub fn end_suite(&self) {
        self.clear_current();
    }

    /// The calling worker's current context, if it set one.
    pub fn current_context(&self) -> Option<ContextHandle> {
        CURRENT.with(|slot| slot.borrow().get(&self.id).cloned())
    }

    /// Direct query by key.
    ///
    /// A method-bearing key resolves to the named case; a suite that has no
    /// cases yet answers for them, covering class-level code that runs
    /// before any case context exists.
    pub fn context_for(&self, key: &ContextKey) -> Option<ContextHandle> {
        let suite = self.suites.get(key.class_name())?.clone();
        if key.is_suite_key() {
            return Some(ContextHandle::Suite(suite));
        }
        if suite.has_no_children() {
            return Some(ContextHandle::Suite(suite));
        }
        let method = key.method_name()?;
        suite.child(method).map(ContextHandle::Case)
    }

    /// Decode a key from a worker-group name and resolve it.
    pub fn lookup_group(&self, group_name: &str) -> Option<ContextHandle> {
        match ContextKey::parse_group_name(group_name) {
            Ok(key) => self.context_for(&key),
            Err(err) => {
                tracing::debug!(group = group_name, %err, "group name did not decode");
                None
            }
        }
    }

    /// Resolve the scope of the calling worker through the three lookup
    /// tiers. `frames` feeds the final, coarsest tier.
    pub fn resolve(&self, frames: &dyn FrameTrace) -> Option<ContextHandle> {
        if let Some(current) = self.current_context() {
            tracing::debug!(scope = %current.key(), "resolved via current slot");
            return Some(current);
        }

        if let Some(name) = std::thread::current().name() {
            if let Some(found) = self.lookup_group(name) {
                tracing::debug!(scope = %found.key(), "resolved via worker-group name");
                return Some(found);
            }
        }

        for frame in frames.frames() {
            for entry in self.suites.iter() {
                if frame.contains(entry.key().as_str()) {
                    tracing::debug!(class = %entry.key(), "resolved via frame trace");
                    return Some(ContextHandle::Suite(entry.value().clone()));
                }
            }
        }

        tracing::debug!(
            available = ?self.available_classes(),
            thread = ?std::thread::current().name(),
            "no scope resolved"
        );
        None
    }

    /// True while any registered suite, or any of its cases, has live
    /// workers.
    pub fn any_has_active_workers(&self) -> bool {
        self.suites.iter().any(|entry| entry.value().has_active_workers())
    }

    /// Class names with a registered suite context, for diagnostics.
    pub fn available_classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self.suites.iter().map(|e| e.key().clone()).collect();
        classes.sort();
        classes
    }

    /// Snapshot of every registered suite context.
    pub fn suites(&self) -> Vec<Arc<SuiteContext>> {
        self.suites.iter().map(|e| e.value().clone()).collect()
    }

    fn set_current(&self, handle: ContextHandle) {
        CURRENT.with(|slot| {
            let previous = slot.borrow_mut().insert(self.id, handle);
            if let Some(previous) = previous {
                tracing::debug!(scope = %previous.key(), "replacing a still-set current context");
            }
        });
    }

    fn clear_current(&self) {
        CURRENT.with(|slot| {
            slot.borrow_mut().remove(&self.id);
        });
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ContextRegistry {
    fn drop(&mut self) {
        // Clear this registry's slot on the dropping thread; slots set by
        // other workers die with those threads.
        self.clear_current();
    }
}
