//! Worker-ownership groups.
//!
//! Every suite and case context owns a named group. Workers spawned inside
//! the scope register with its group; the group observes membership and a
//! live count but does not control worker lifecycles. Interruption is
//! cooperative: the group carries a flag that workers are expected to poll.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

struct GroupState {
    active: AtomicUsize,
    next_id: AtomicU64,
    members: Mutex<HashSet<u64>>,
    interrupted: AtomicBool,
}

/// Named membership set for workers spawned inside one scope.
#[derive(Clone)]
pub struct WorkerGroup {
    name: String,
    state: Arc<GroupState>,
}

impl WorkerGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(GroupState {
                active: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                members: Mutex::new(HashSet::new()),
                interrupted: AtomicBool::new(false),
            }),
        }
    }

    /// The group name, which encodes the owning context key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live registered workers.
    pub fn active_count(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    pub fn has_active_workers(&self) -> bool {
        self.active_count() > 0
    }

    /// Ids of currently registered workers, for diagnostics.
    pub fn member_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.state.members.lock().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Register the calling worker. The returned guard deregisters on drop,
    /// including during unwind.
    pub fn register(&self) -> WorkerGuard {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.members.lock().insert(id);
        self.state.active.fetch_add(1, Ordering::SeqCst);
        WorkerGuard { state: self.state.clone(), id }
    }

    /// Spawn a worker thread owned by this group.
    ///
    /// The thread is named after the group so the naming-convention lookup
    /// can map it back to the owning context. Registration happens in the
    /// caller, before the thread starts, so the live count never reads zero
    /// between spawn and thread startup.
    pub fn spawn<F>(&self, f: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.register();
        std::thread::Builder::new().name(self.name.clone()).spawn(move || {
            let _guard = guard;
            f();
        })
    }

    /// Ask workers in this group to stop. Cooperative: workers must poll
    /// [`WorkerGroup::interrupt_requested`].
    pub fn request_interrupt(&self) {
        self.state.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn interrupt_requested(&self) -> bool {
        self.state.interrupted.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WorkerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerGroup")
            .field("name", &self.name)
            .field("active", &self.active_count())
            .finish()
    }
}

/// RAII registration for one worker in a group.
pub struct WorkerGuard {
    state: Arc<GroupState>,
    id: u64,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.state.members.lock().remove(&self.id);
        self.state.active.fetch_sub(1, Ordering::SeqCst);
    }
}
