//! Retry driven end to end through the sandbox lifecycle.

use std::sync::Arc;

use testwarden::context::NoFrameTrace;
use testwarden::{
    ContextKey, Fault, FaultKind, RetryOutcome, Sandbox, SandboxConfig, SandboxSupervisor,
    Violation,
};

fn supervisor(config: SandboxConfig) -> Arc<SandboxSupervisor> {
    Arc::new(SandboxSupervisor::new(config).with_frame_trace(Box::new(NoFrameTrace)))
}

#[test]
fn flaky_case_passes_without_any_failure() {
    let sandbox = Sandbox::new(SandboxConfig { retries: 2, ..Default::default() });
    let sup = sandbox.supervisor().clone();

    let mut calls = 0;
    let outcome = sup.with_suite("org.foo.Flaky", || {
        sandbox.invoker().invoke("org.foo.Flaky#sometimes", || {
            sup.with_case("org.foo.Flaky", "sometimes", || {
                calls += 1;
                if calls < 3 {
                    Err(Fault::assertion("not yet"))
                } else {
                    Ok(())
                }
            })
        })
    });

    assert_eq!(calls, 3);
    assert_eq!(outcome.unwrap(), RetryOutcome::Flaky { attempts: 3 });

    // No violation was recorded against the case along the way.
    let key = ContextKey::case("org.foo.Flaky", "sometimes");
    let context = sup.context_for(&key).unwrap();
    assert!(context.first_failure().is_none());
}

#[test]
fn exhausted_retries_surface_the_first_fault() {
    let sandbox = Sandbox::new(SandboxConfig { retries: 1, ..Default::default() });
    let sup = sandbox.supervisor().clone();

    let mut calls = 0;
    let err = sup
        .with_suite("org.foo.Broken", || {
            sandbox.invoker().invoke("org.foo.Broken#always", || {
                sup.with_case("org.foo.Broken", "always", || {
                    calls += 1;
                    Err(Fault::assertion(format!("attempt {}", calls)))
                })
            })
        })
        .unwrap_err();

    assert_eq!(calls, 2);
    assert_eq!(err.message, "attempt 1");
    assert_eq!(err.kind, FaultKind::Assertion);
}

#[test]
fn fatal_fault_skips_remaining_attempts() {
    let sandbox = Sandbox::new(SandboxConfig { retries: 4, ..Default::default() });

    let mut calls = 0;
    let err = sandbox
        .invoker()
        .invoke("org.foo.Broken#oom", || {
            calls += 1;
            Err(Fault::fatal("java.lang.OutOfMemoryError"))
        })
        .unwrap_err();

    assert_eq!(calls, 1);
    assert_eq!(err.kind, FaultKind::Fatal);
}

#[test]
fn violation_during_a_retried_attempt_still_sticks() {
    let sup = supervisor(SandboxConfig { retries: 1, ..Default::default() });
    let invoker = testwarden::RetryingInvoker::new(1);

    // First attempt trips the exit check, second attempt passes. The pass
    // does not erase the recorded violation; the listener decides what to
    // do with it at case end.
    let mut calls = 0;
    let outcome = sup.with_suite("org.foo.Exits", || {
        invoker.invoke("org.foo.Exits#once", || {
            sup.with_case("org.foo.Exits", "once", || {
                calls += 1;
                if calls == 1 {
                    assert!(sup.check_exit(7).is_err());
                    Err(Fault::assertion("exited"))
                } else {
                    Ok(())
                }
            })
        })
    });

    assert_eq!(outcome.unwrap(), RetryOutcome::Flaky { attempts: 2 });

    let key = ContextKey::case("org.foo.Exits", "once");
    let context = sup.context_for(&key).unwrap();
    assert_eq!(
        context.first_failure(),
        Some(Violation::DisallowedExit { status: 7, scope: key.to_string() })
    );
}

#[test]
fn zero_retries_invokes_exactly_once() {
    let sandbox = Sandbox::from_env();
    assert_eq!(sandbox.invoker().retries(), 0);

    let mut calls = 0;
    let err = sandbox
        .invoker()
        .invoke("org.foo.Plain#test", || {
            calls += 1;
            Err(Fault::recoverable("boom"))
        })
        .unwrap_err();
    assert_eq!(calls, 1);
    assert_eq!(err.message, "boom");
}
