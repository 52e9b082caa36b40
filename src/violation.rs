//! Violation and error types for the sandbox.
//!
//! Violations are recorded on the owning context at interception time and
//! pulled by the listener at scope boundaries; they are never fired at the
//! point of interception because the intercepted call must unwind first.

use thiserror::Error;

/// A recorded policy breach, attributed to a scope or not.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Violation {
    #[error("process exit with status {status} is not allowed; scope: {scope}")]
    DisallowedExit { status: i32, scope: String },

    #[error("process exit with status {status} is not allowed (no owning test scope found)")]
    UnattributedExit { status: i32 },

    #[error("{operation} is not allowed; scope: {scope}")]
    DisallowedOperation { operation: String, scope: String },

    #[error("{operation} could not be attributed to any test scope")]
    Unattributed { operation: String },

    #[error("workers spawned by {scope} are still running ({active} active)")]
    DanglingWorkers { scope: String, active: usize },
}

impl Violation {
    /// Whether the violation carries an owning scope.
    pub fn is_attributed(&self) -> bool {
        !matches!(self, Self::UnattributedExit { .. } | Self::Unattributed { .. })
    }

    /// Whether the violation came from a worker outliving its scope rather
    /// than a disallowed call.
    pub fn is_dangling(&self) -> bool {
        matches!(self, Self::DanglingWorkers { .. })
    }
}

/// Errors from installing or tearing down the process-wide hook.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("a sandbox supervisor is already installed")]
    AlreadyInstalled,

    #[error("no sandbox supervisor is installed")]
    NotInstalled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribution_predicate() {
        let attributed = Violation::DisallowedExit { status: 1, scope: "Foo#bar".into() };
        assert!(attributed.is_attributed());

        let unattributed = Violation::UnattributedExit { status: 1 };
        assert!(!unattributed.is_attributed());

        let miss = Violation::Unattributed { operation: "connect".into() };
        assert!(!miss.is_attributed());
    }

    #[test]
    fn test_dangling_predicate() {
        let dangling = Violation::DanglingWorkers { scope: "Foo".into(), active: 2 };
        assert!(dangling.is_dangling());
        assert!(dangling.is_attributed());

        let exit = Violation::DisallowedExit { status: 0, scope: "Foo".into() };
        assert!(!exit.is_dangling());
    }

    #[test]
    fn test_messages_name_the_scope() {
        let v = Violation::DisallowedExit { status: 3, scope: "org.foo.Foo#test".into() };
        let msg = v.to_string();
        assert!(msg.contains("status 3"));
        assert!(msg.contains("org.foo.Foo#test"));
    }
}
