//! Suite and case contexts: the scopes violations are attributed to.
//!
//! A suite context exists per test class and owns one case context per test
//! method. Both carry a worker-ownership group whose name encodes the
//! owning [`ContextKey`], which is what lets the lookup engine map a worker
//! thread back to its scope without any enforced call-site tagging.

mod group;
pub mod registry;

pub use group::{WorkerGroup, WorkerGuard};
pub use registry::{ContextRegistry, FrameTrace, NoFrameTrace, StackFrameTrace};

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::violation::Violation;

/// Marker segment between class and method in a group name.
const METHOD_MARKER: &str = "m";
/// Trailing segment of every group name.
const GROUP_SUFFIX: &str = "Threads";
/// Placeholder for an absent method name.
const NO_METHOD: &str = "null";

/// Errors decoding a context key from a worker-group name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupNameError {
    #[error("group name {name:?} has {found} segments, expected 4")]
    WrongSegmentCount { name: String, found: usize },

    #[error("group name {name:?} is missing the {expected:?} marker")]
    BadMarker { name: String, expected: &'static str },
}

/// Identifies a scope: a test class, or one method within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    class_name: String,
    method_name: Option<String>,
}

impl ContextKey {
    /// Key for a whole test class.
    pub fn suite(class_name: impl Into<String>) -> Self {
        Self { class_name: class_name.into(), method_name: None }
    }

    /// Key for one test method.
    pub fn case(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self { class_name: class_name.into(), method_name: Some(method_name.into()) }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method_name(&self) -> Option<&str> {
        self.method_name.as_deref()
    }

    pub fn is_suite_key(&self) -> bool {
        self.method_name.is_none()
    }

    /// Encode this key as a worker-group name.
    ///
    /// Lossless for class and method names that do not contain `-`.
    pub fn group_name(&self) -> String {
        let method = self.method_name.as_deref().unwrap_or(NO_METHOD);
        format!("{}-{}-{}-{}", self.class_name, METHOD_MARKER, method, GROUP_SUFFIX)
    }

    /// Decode a key from a worker-group name produced by
    /// [`ContextKey::group_name`].
    pub fn parse_group_name(name: &str) -> Result<Self, GroupNameError> {
        let segments: Vec<&str> = name.split('-').collect();
        if segments.len() != 4 {
            return Err(GroupNameError::WrongSegmentCount {
                name: name.to_string(),
                found: segments.len(),
            });
        }
        if segments[1] != METHOD_MARKER {
            return Err(GroupNameError::BadMarker { name: name.to_string(), expected: METHOD_MARKER });
        }
        if segments[3] != GROUP_SUFFIX {
            return Err(GroupNameError::BadMarker { name: name.to_string(), expected: GROUP_SUFFIX });
        }
        let method = if segments[2] == NO_METHOD { None } else { Some(segments[2].to_string()) };
        Ok(Self { class_name: segments[0].to_string(), method_name: method })
    }
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.method_name {
            Some(method) => write!(f, "{}#{}", self.class_name, method),
            None => write!(f, "{}", self.class_name),
        }
    }
}

/// Whether a scope is a whole suite or a single case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Suite,
    Case,
}

/// Context for one executing test case.
pub struct CaseContext {
    key: ContextKey,
    group: WorkerGroup,
    failure: Mutex<Option<Violation>>,
}

impl CaseContext {
    pub(crate) fn new(key: ContextKey) -> Self {
        let group = WorkerGroup::new(key.group_name());
        Self { key, group, failure: Mutex::new(None) }
    }

    pub fn key(&self) -> &ContextKey {
        &self.key
    }

    pub fn group(&self) -> &WorkerGroup {
        &self.group
    }

    /// Record a violation. First write wins; later violations in the same
    /// scope are dropped so retries and follow-on faults cannot mask the
    /// original cause. Returns whether the violation was recorded.
    pub fn record_violation(&self, violation: Violation) -> bool {
        let mut slot = self.failure.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(violation);
        true
    }

    pub fn first_failure(&self) -> Option<Violation> {
        self.failure.lock().clone()
    }

    pub fn had_failures(&self) -> bool {
        self.failure.lock().is_some()
    }

    pub fn has_active_workers(&self) -> bool {
        self.group.has_active_workers()
    }

    pub fn active_worker_count(&self) -> usize {
        self.group.active_count()
    }
}

impl std::fmt::Debug for CaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseContext")
            .field("key", &self.key.to_string())
            .field("active_workers", &self.group.active_count())
            .field("failure", &self.first_failure())
            .finish()
    }
}

/// Context for one test class. Owns the contexts of its cases.
pub struct SuiteContext {
    key: ContextKey,
    group: WorkerGroup,
    children: RwLock<HashMap<String, Arc<CaseContext>>>,
    failure: Mutex<Option<Violation>>,
}

impl SuiteContext {
    pub(crate) fn new(class_name: impl Into<String>) -> Self {
        let key = ContextKey::suite(class_name);
        let group = WorkerGroup::new(key.group_name());
        Self { key, group, children: RwLock::new(HashMap::new()), failure: Mutex::new(None) }
    }

    pub fn key(&self) -> &ContextKey {
        &self.key
    }

    pub fn group(&self) -> &WorkerGroup {
        &self.group
    }

    pub(crate) fn add_child(&self, child: Arc<CaseContext>) {
        // Case keys always carry a method name; a suite-shaped key is
        // never inserted as a child.
        if let Some(method) = child.key().method_name() {
            self.children.write().insert(method.to_string(), child);
        }
    }

    pub fn child(&self, method_name: &str) -> Option<Arc<CaseContext>> {
        self.children.read().get(method_name).cloned()
    }

    pub fn has_no_children(&self) -> bool {
        self.children.read().is_empty()
    }

    /// Record a suite-level violation. First write wins, as for cases.
    pub fn record_violation(&self, violation: Violation) -> bool {
        let mut slot = self.failure.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(violation);
        true
    }

    /// The suite's own recorded violation, if any. Child failures are
    /// reported on the child; see [`SuiteContext::failures`] for the union.
    pub fn first_failure(&self) -> Option<Violation> {
        self.failure.lock().clone()
    }

    /// Union of the suite's own failure and all children's.
    pub fn failures(&self) -> Vec<Violation> {
        let mut all = Vec::new();
        if let Some(own) = self.failure.lock().clone() {
            all.push(own);
        }
        for child in self.children.read().values() {
            all.extend(child.first_failure());
        }
        all
    }

    pub fn had_failures(&self) -> bool {
        !self.failures().is_empty()
    }

    /// True while any worker registered under this suite or any of its
    /// cases is alive.
    pub fn has_active_workers(&self) -> bool {
        if self.group.has_active_workers() {
            return true;
        }
        self.children.read().values().any(|c| c.has_active_workers())
    }

    /// Live workers under this suite and all of its cases.
    pub fn active_worker_count(&self) -> usize {
        let own = self.group.active_count();
        let children: usize =
            self.children.read().values().map(|c| c.active_worker_count()).sum();
        own + children
    }

    /// Ask every worker owned by this suite or its cases to stop.
    pub fn request_interrupt(&self) {
        self.group.request_interrupt();
        for child in self.children.read().values() {
            child.group().request_interrupt();
        }
    }
}

impl std::fmt::Debug for SuiteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiteContext")
            .field("key", &self.key.to_string())
            .field("children", &self.children.read().len())
            .field("active_workers", &self.group.active_count())
            .finish()
    }
}

/// Uniform handle to either scope context.
#[derive(Debug, Clone)]
pub enum ContextHandle {
    Suite(Arc<SuiteContext>),
    Case(Arc<CaseContext>),
}

impl ContextHandle {
    pub fn key(&self) -> &ContextKey {
        match self {
            Self::Suite(s) => s.key(),
            Self::Case(c) => c.key(),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        match self {
            Self::Suite(_) => ScopeKind::Suite,
            Self::Case(_) => ScopeKind::Case,
        }
    }

    pub fn group(&self) -> &WorkerGroup {
        match self {
            Self::Suite(s) => s.group(),
            Self::Case(c) => c.group(),
        }
    }

    pub fn record_violation(&self, violation: Violation) -> bool {
        match self {
            Self::Suite(s) => s.record_violation(violation),
            Self::Case(c) => c.record_violation(violation),
        }
    }

    pub fn first_failure(&self) -> Option<Violation> {
        match self {
            Self::Suite(s) => s.first_failure(),
            Self::Case(c) => c.first_failure(),
        }
    }

    pub fn has_active_workers(&self) -> bool {
        match self {
            Self::Suite(s) => s.has_active_workers(),
            Self::Case(c) => c.has_active_workers(),
        }
    }

    pub fn active_worker_count(&self) -> usize {
        match self {
            Self::Suite(s) => s.active_worker_count(),
            Self::Case(c) => c.active_worker_count(),
        }
    }

    /// Spawn a worker owned by this scope. The worker thread is named after
    /// the scope's group so it can be attributed even when the thread-local
    /// slot does not apply.
    pub fn spawn_worker<F>(&self, f: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.group().spawn(f)
    }

    /// Whether two handles refer to the same context object.
    pub fn same_context(&self, other: &ContextHandle) -> bool {
        match (self, other) {
            (Self::Suite(a), Self::Suite(b)) => Arc::ptr_eq(a, b),
            (Self::Case(a), Self::Case(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
