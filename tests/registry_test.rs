//! Context registry and worker-attribution tests with real threads.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use testwarden::context::{ContextKey, ContextRegistry, NoFrameTrace};
use testwarden::ScopeKind;

/// A worker that blocks until released, so activity windows are
/// deterministic.
fn blocked_worker(
    context: &testwarden::ContextHandle,
) -> (mpsc::Sender<()>, std::thread::JoinHandle<()>) {
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let handle = context
        .spawn_worker(move || {
            release_rx.recv().unwrap();
        })
        .unwrap();
    (release_tx, handle)
}

#[test]
fn suite_then_test_worker_counts() {
    let registry = ContextRegistry::new();
    registry.start_suite(&ContextKey::suite("org.foo.Foo"));
    let suite = registry.context_for(&ContextKey::suite("org.foo.Foo")).unwrap();
    let case = registry.start_test(&ContextKey::case("org.foo.Foo", "test"));

    assert!(!registry.any_has_active_workers());
    assert!(!suite.has_active_workers());

    let (release, handle) = blocked_worker(&case);

    assert!(registry.any_has_active_workers());
    assert!(case.has_active_workers());
    // The suite aggregates its cases' workers.
    assert!(suite.has_active_workers());

    release.send(()).unwrap();
    handle.join().unwrap();

    assert!(!registry.any_has_active_workers());
    assert!(!suite.has_active_workers());
    assert!(!case.has_active_workers());

    registry.end_test();
}

#[test]
fn inner_and_outer_workers_are_tracked_separately() {
    let registry = ContextRegistry::new();
    registry.start_suite(&ContextKey::suite("org.foo.Foo"));
    let suite = registry.context_for(&ContextKey::suite("org.foo.Foo")).unwrap();
    let case = registry.start_test(&ContextKey::case("org.foo.Foo", "test"));

    let (release_suite, suite_handle) = blocked_worker(&suite);

    assert!(registry.any_has_active_workers());
    assert!(suite.has_active_workers());
    assert!(!case.has_active_workers());

    let (release_case, case_handle) = blocked_worker(&case);

    assert!(suite.has_active_workers());
    assert!(case.has_active_workers());
    assert_eq!(suite.active_worker_count(), 2);

    release_suite.send(()).unwrap();
    release_case.send(()).unwrap();
    suite_handle.join().unwrap();
    case_handle.join().unwrap();

    assert!(!registry.any_has_active_workers());
    registry.end_test();
}

#[test]
fn worker_of_one_case_never_counts_for_a_sibling() {
    let registry = ContextRegistry::new();
    registry.start_suite(&ContextKey::suite("org.foo.Foo"));
    let case_a = registry.start_test(&ContextKey::case("org.foo.Foo", "a"));
    registry.end_test();
    let case_b = registry.start_test(&ContextKey::case("org.foo.Foo", "b"));
    registry.end_test();

    let (release, handle) = blocked_worker(&case_a);

    assert!(case_a.has_active_workers());
    assert!(!case_b.has_active_workers());
    assert_eq!(case_b.active_worker_count(), 0);

    release.send(()).unwrap();
    handle.join().unwrap();
}

#[test]
fn spawned_worker_resolves_to_its_case_by_group_name() {
    let registry = Arc::new(ContextRegistry::new());
    registry.start_suite(&ContextKey::suite("org.foo.Foo"));
    let case = registry.start_test(&ContextKey::case("org.foo.Foo", "test"));

    let (tx, rx) = mpsc::channel();
    let registry_clone = registry.clone();
    let handle = case
        .spawn_worker(move || {
            // The thread-local slot is not inherited; resolution must fall
            // through to the worker-group name.
            let resolved = registry_clone.resolve(&NoFrameTrace);
            tx.send(resolved.map(|c| c.key().to_string())).unwrap();
        })
        .unwrap();

    let resolved = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    handle.join().unwrap();
    assert_eq!(resolved.as_deref(), Some("org.foo.Foo#test"));
    registry.end_test();
}

#[test]
fn suite_worker_resolves_to_the_suite() {
    let registry = Arc::new(ContextRegistry::new());
    registry.start_suite(&ContextKey::suite("org.foo.Foo"));
    let suite = registry.context_for(&ContextKey::suite("org.foo.Foo")).unwrap();
    registry.end_suite();

    let (tx, rx) = mpsc::channel();
    let registry_clone = registry.clone();
    let handle = suite
        .spawn_worker(move || {
            let name = std::thread::current().name().map(str::to_owned);
            let resolved = registry_clone.resolve(&NoFrameTrace);
            tx.send((name, resolved.map(|c| (c.kind(), c.key().to_string())))).unwrap();
        })
        .unwrap();

    let (name, resolved) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    handle.join().unwrap();

    // Suite groups encode the missing method as "null".
    assert!(name.unwrap().contains("-m-null-Threads"));
    assert_eq!(resolved, Some((ScopeKind::Suite, "org.foo.Foo".to_string())));
}

#[test]
fn unconventional_worker_does_not_resolve() {
    let registry = Arc::new(ContextRegistry::new());
    registry.start_test(&ContextKey::case("org.foo.Foo", "test"));
    registry.end_test();

    let (tx, rx) = mpsc::channel();
    let registry_clone = registry.clone();
    // Plain spawn bypasses the ownership convention entirely.
    let handle = std::thread::spawn(move || {
        tx.send(registry_clone.resolve(&NoFrameTrace).is_some()).unwrap();
    });

    let resolved = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    handle.join().unwrap();
    assert!(!resolved);
}
