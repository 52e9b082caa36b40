//! Retry-aware case invocation.
//!
//! Wraps a single case body with bounded retry and failure classification,
//! for tests known or suspected to be flaky. Severe faults abort
//! immediately; everything else is retried with the first fault captured,
//! so retries never hide the original defect.

use thiserror::Error;

use crate::telemetry::{log_sandbox_event, SandboxEvent};

/// Classification of a fault thrown by a case body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// An assertion-style failure. Retried.
    Assertion,
    /// A generic recoverable fault. Retried.
    Recoverable,
    /// A severe runtime fault (out-of-memory-like, linkage-like).
    /// Retrying after one of these makes no sense; propagated unchanged.
    Fatal,
}

/// A fault raised by one invocation of a case body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn assertion(message: impl Into<String>) -> Self {
        Self { kind: FaultKind::Assertion, message: message.into() }
    }

    pub fn recoverable(message: impl Into<String>) -> Self {
        Self { kind: FaultKind::Recoverable, message: message.into() }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self { kind: FaultKind::Fatal, message: message.into() }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, FaultKind::Fatal)
    }
}

/// How an invocation eventually succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Passed on the first attempt.
    Passed,
    /// Passed only after retrying. Informational, not a failure.
    Flaky { attempts: usize },
}

/// Invokes a case body up to `retries + 1` times.
#[derive(Debug, Clone)]
pub struct RetryingInvoker {
    retries: usize,
}

impl RetryingInvoker {
    pub fn new(retries: usize) -> Self {
        Self { retries }
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Run `body` until it passes or attempts are exhausted.
    ///
    /// The body is re-invoked from scratch on every attempt so setup and
    /// teardown behave as they would under a clean manual re-run. On
    /// exhaustion the first captured fault, not the last, is returned.
    pub fn invoke<F>(&self, name: &str, mut body: F) -> Result<RetryOutcome, Fault>
    where
        F: FnMut() -> Result<(), Fault>,
    {
        let mut first: Option<Fault> = None;

        for attempt in 0..=self.retries {
            match body() {
                Ok(()) => {
                    if attempt > 0 {
                        let attempts = attempt + 1;
                        log_sandbox_event(
                            SandboxEvent::FlakyPass,
                            &format!("{} is FLAKY; passed after {} attempts", name, attempts),
                            &[("test", name)],
                        );
                        return Ok(RetryOutcome::Flaky { attempts });
                    }
                    return Ok(RetryOutcome::Passed);
                }
                Err(fault) => {
                    if !fault.is_retryable() {
                        return Err(fault);
                    }
                    if first.is_none() {
                        first = Some(fault);
                    }
                }
            }
        }

        match first {
            Some(fault) => Err(fault),
            // Unreachable: the loop always runs at least once.
            None => Ok(RetryOutcome::Passed),
        }
    }
}
