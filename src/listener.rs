//! Test-engine integration.
//!
//! [`SandboxListener`] translates the host engine's lifecycle callbacks
//! into context starts and ends, and turns accumulated violations and
//! dangling-worker state into reported failures. Failures go through a
//! [`FailureSink`] supplied by the host; the listener never raises at the
//! point of interception.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::{ContextHandle, ContextKey};
use crate::hook::SandboxSupervisor;
use crate::telemetry::{log_sandbox_event, SandboxEvent};
use crate::violation::Violation;

/// Receives failures attributed to a scope. Implemented by the host's
/// reporting layer; a plain `Vec` works for tests.
pub trait FailureSink {
    fn failure(&mut self, key: &ContextKey, violation: Violation);
}

impl FailureSink for Vec<(ContextKey, Violation)> {
    fn failure(&mut self, key: &ContextKey, violation: Violation) {
        self.push((key.clone(), violation));
    }
}

/// Per-scope reporting state. `Failed` is sticky: once a scope failed, no
/// further policy-driven failures are reported for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    Started,
    Failed,
    DanglingWorkers,
    Clean,
}

/// Drives the context registry from the host engine's lifecycle callbacks.
pub struct SandboxListener {
    supervisor: Arc<SandboxSupervisor>,
    states: Mutex<HashMap<ContextKey, TestState>>,
}

impl SandboxListener {
    pub fn new(supervisor: Arc<SandboxSupervisor>) -> Self {
        Self { supervisor, states: Mutex::new(HashMap::new()) }
    }

    pub fn supervisor(&self) -> &Arc<SandboxSupervisor> {
        &self.supervisor
    }

    pub fn state_of(&self, key: &ContextKey) -> Option<TestState> {
        self.states.lock().get(key).copied()
    }

    /// Host callback: a test class is about to run.
    pub fn suite_started(&self, class_name: &str) {
        self.supervisor.start_suite(class_name);
        self.states.lock().insert(ContextKey::suite(class_name), TestState::Started);
    }

    /// Host callback: a test method is about to run.
    pub fn case_started(&self, class_name: &str, method_name: &str) {
        self.supervisor.start_test(class_name, method_name);
        self.states
            .lock()
            .insert(ContextKey::case(class_name, method_name), TestState::Started);
    }

    /// Host callback: the scope failed for a reason of its own (assertion,
    /// error in the body). Sticky; suppresses policy-driven reporting so
    /// the original failure is the one the user sees.
    pub fn case_failed(&self, key: &ContextKey) {
        self.states.lock().insert(key.clone(), TestState::Failed);
    }

    /// Host callback: a test method finished. Reads back the case's
    /// violations and worker activity and reports accordingly. The
    /// current-context slot is cleared on every path.
    pub fn case_finished(&self, key: &ContextKey, sink: &mut dyn FailureSink) {
        let _end = EndTest { supervisor: &self.supervisor };

        if self.state_of(key) == Some(TestState::Failed) {
            // Already failed for an unrelated reason; show only that.
            return;
        }

        let Some(context) = self.supervisor.context_for(key) else {
            return;
        };

        if let Some(violation) = context.first_failure() {
            self.report(key, violation, sink);
        }
        self.handle_dangling(key, &context, sink);

        let mut states = self.states.lock();
        if states.get(key) == Some(&TestState::Started) {
            states.insert(key.clone(), TestState::Clean);
        }
    }

    /// Host callback: a test class finished. Clears the suite context slot.
    pub fn suite_finished(&self, key: &ContextKey, sink: &mut dyn FailureSink) {
        let _end = EndSuite { supervisor: &self.supervisor };

        if self.state_of(key) == Some(TestState::Failed) {
            return;
        }
        let Some(context) = self.supervisor.context_for(key) else {
            return;
        };
        if let Some(violation) = context.first_failure() {
            self.report(key, violation, sink);
        }
        self.handle_dangling(key, &context, sink);
    }

    /// Host callback: the whole run finished. Reports violations recorded
    /// after their scope ended (workers finishing late), and re-checks
    /// worker activity at suite granularity, where fixture workers may only
    /// settle after the last case.
    pub fn run_finished(&self, sink: &mut dyn FailureSink) {
        let snapshot: Vec<(ContextKey, TestState)> =
            self.states.lock().iter().map(|(k, s)| (k.clone(), *s)).collect();

        for (key, state) in &snapshot {
            if *state == TestState::Failed {
                continue;
            }
            let Some(context) = self.supervisor.context_for(key) else {
                continue;
            };
            if let Some(violation) = context.first_failure() {
                self.report(key, violation, sink);
                continue;
            }
            self.handle_dangling(key, &context, sink);
        }

        if self.supervisor.suite_granularity() {
            let classes: HashSet<String> =
                snapshot.iter().map(|(k, _)| k.class_name().to_string()).collect();
            for class in classes {
                let suite_key = ContextKey::suite(&class);
                if self.state_of(&suite_key) == Some(TestState::Failed) {
                    continue;
                }
                let Some(context) = self.supervisor.context_for(&suite_key) else {
                    continue;
                };
                self.handle_dangling(&suite_key, &context, sink);
            }
        }
    }

    fn handle_dangling(
        &self,
        key: &ContextKey,
        context: &ContextHandle,
        sink: &mut dyn FailureSink,
    ) {
        if !context.has_active_workers() {
            return;
        }
        if self.supervisor.disallows_workers_for(context) {
            let violation = Violation::DanglingWorkers {
                scope: key.to_string(),
                active: context.active_worker_count(),
            };
            log_sandbox_event(
                SandboxEvent::DanglingWorkers,
                &violation.to_string(),
                &[("scope", &key.to_string())],
            );
            self.report(key, violation, sink);
        } else {
            let mut states = self.states.lock();
            if states.get(key) != Some(&TestState::Failed) {
                states.insert(key.clone(), TestState::DanglingWorkers);
            }
        }
    }

    fn report(&self, key: &ContextKey, violation: Violation, sink: &mut dyn FailureSink) {
        sink.failure(key, violation);
        self.states.lock().insert(key.clone(), TestState::Failed);
    }
}

struct EndTest<'a> {
    supervisor: &'a SandboxSupervisor,
}

impl Drop for EndTest<'_> {
    fn drop(&mut self) {
        self.supervisor.end_test();
    }
}

struct EndSuite<'a> {
    supervisor: &'a SandboxSupervisor,
}

impl Drop for EndSuite<'_> {
    fn drop(&mut self) {
        self.supervisor.end_suite();
    }
}
