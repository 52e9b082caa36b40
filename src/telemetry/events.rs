//! Sandbox event logging.
//!
//! Structured log entries for interception outcomes so a run's violations
//! and near-misses can be reconstructed from the log stream alone.

use std::time::{SystemTime, UNIX_EPOCH};

/// Event types emitted by the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxEvent {
    /// A disallowed process-exit call was intercepted and denied.
    ExitBlocked,
    /// A disallowed non-exit operation was intercepted and denied.
    OperationBlocked,
    /// A guarded operation could not be attributed to any scope.
    AttributionMiss,
    /// A scope ended while its workers were still running.
    DanglingWorkers,
    /// Dangling workers were asked to stop at run end.
    WorkersInterrupted,
    /// A case passed only after one or more retries.
    FlakyPass,
}

impl SandboxEvent {
    /// Get the severity level for this event.
    pub fn severity(&self) -> SandboxSeverity {
        match self {
            Self::ExitBlocked => SandboxSeverity::Error,
            Self::OperationBlocked => SandboxSeverity::Error,
            Self::AttributionMiss => SandboxSeverity::Warning,
            Self::DanglingWorkers => SandboxSeverity::Warning,
            Self::WorkersInterrupted => SandboxSeverity::Info,
            Self::FlakyPass => SandboxSeverity::Info,
        }
    }

    /// Get a string representation of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExitBlocked => "exit_blocked",
            Self::OperationBlocked => "operation_blocked",
            Self::AttributionMiss => "attribution_miss",
            Self::DanglingWorkers => "dangling_workers",
            Self::WorkersInterrupted => "workers_interrupted",
            Self::FlakyPass => "flaky_pass",
        }
    }
}

/// Severity levels for sandbox events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SandboxSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl SandboxSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Log a sandbox event with structured data.
///
/// # Arguments
/// * `event` - The type of sandbox event
/// * `message` - Human-readable description
/// * `details` - Additional structured details as key-value pairs
pub fn log_sandbox_event(event: SandboxEvent, message: &str, details: &[(&str, &str)]) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let event_type = event.as_str();
    let severity = event.severity();

    let details_str = details
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");

    let log_line = if details_str.is_empty() {
        format!("[{}] SANDBOX {} {}: {}", timestamp, severity.as_str(), event_type, message)
    } else {
        format!(
            "[{}] SANDBOX {} {}: {} | {}",
            timestamp,
            severity.as_str(),
            event_type,
            message,
            details_str
        )
    };

    match severity {
        SandboxSeverity::Debug => tracing::debug!("{}", log_line),
        SandboxSeverity::Info => tracing::info!("{}", log_line),
        SandboxSeverity::Warning => tracing::warn!("{}", log_line),
        SandboxSeverity::Error => tracing::error!("{}", log_line),
    }
}
