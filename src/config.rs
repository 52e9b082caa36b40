//! Sandbox configuration loading from environment variables.
//!
//! All configuration values are loaded from `TESTWARDEN_*` environment
//! variables with sensible defaults. Invalid values fall back to defaults
//! without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `TESTWARDEN_EXIT` | disallow | Process-exit handling (`allow`/`disallow`) |
//! | `TESTWARDEN_THREADS` | allow_all | Worker-thread handling mode |
//! | `TESTWARDEN_RETRIES` | 0 | Retry attempts after the initial invocation |
//! | `TESTWARDEN_GRACE_MS` | 100 | Grace wait after interrupting dangling workers |

use std::str::FromStr;
use std::time::Duration;

use crate::context::ScopeKind;

/// How a guarded process-exit call is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExitHandling {
    /// Let test code terminate the process. Rarely what you want.
    Allow,
    /// Record a violation against the owning scope and refuse the call.
    #[default]
    Disallow,
}

impl ExitHandling {
    pub fn disallows_exit(&self) -> bool {
        matches!(self, Self::Disallow)
    }
}

impl FromStr for ExitHandling {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "disallow" => Ok(Self::Disallow),
            _ => Err(()),
        }
    }
}

/// How workers spawned by test code are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThreadHandling {
    /// Allow workers, and allow them to outlive their scope.
    #[default]
    AllowAll,
    /// Workers are not allowed at all; any worker alive at scope end fails it.
    Disallow,
    /// Workers may run during a case but must be gone when the case ends.
    DisallowDanglingCaseThreads,
    /// Workers may outlive their case but must be gone when the suite ends.
    DisallowDanglingSuiteThreads,
}

impl ThreadHandling {
    /// Whether a scope of the given kind with live workers at scope end is a
    /// violation.
    pub fn disallows_dangling_for(&self, kind: ScopeKind) -> bool {
        match self {
            Self::AllowAll => false,
            Self::Disallow => true,
            Self::DisallowDanglingCaseThreads => true,
            Self::DisallowDanglingSuiteThreads => kind == ScopeKind::Suite,
        }
    }

    /// Whether dangling enforcement happens at suite granularity, requiring a
    /// re-check of suite worker activity at run end.
    pub fn suite_granularity(&self) -> bool {
        matches!(self, Self::DisallowDanglingSuiteThreads)
    }
}

impl FromStr for ThreadHandling {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow_all" => Ok(Self::AllowAll),
            "disallow" => Ok(Self::Disallow),
            "disallow_dangling_case" => Ok(Self::DisallowDanglingCaseThreads),
            "disallow_dangling_suite" => Ok(Self::DisallowDanglingSuiteThreads),
            _ => Err(()),
        }
    }
}

/// All sandbox configuration.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub exit_handling: ExitHandling,
    pub thread_handling: ThreadHandling,
    /// Retry attempts after the initial invocation of a case body.
    pub retries: usize,
    /// How long to wait for interrupted workers to drain at run end.
    pub interrupt_grace: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            exit_handling: ExitHandling::default(),
            thread_handling: ThreadHandling::default(),
            retries: 0,
            interrupt_grace: Duration::from_millis(100),
        }
    }
}

impl SandboxConfig {
    pub fn disallows_exit(&self) -> bool {
        self.exit_handling.disallows_exit()
    }

    pub fn disallows_dangling_for(&self, kind: ScopeKind) -> bool {
        self.thread_handling.disallows_dangling_for(kind)
    }
}

/// Parse an enum-valued env var, returning `default` on missing or invalid.
fn parse_enum<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> SandboxConfig {
    let exit_handling = parse_enum("TESTWARDEN_EXIT", ExitHandling::default());
    let thread_handling = parse_enum("TESTWARDEN_THREADS", ThreadHandling::default());
    let retries = parse_usize("TESTWARDEN_RETRIES", 0);
    let grace_ms = parse_u64("TESTWARDEN_GRACE_MS", 100);

    SandboxConfig {
        exit_handling,
        thread_handling,
        retries,
        interrupt_grace: Duration::from_millis(grace_ms),
    }
}
