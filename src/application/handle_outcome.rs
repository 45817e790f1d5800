//! Result of one pass through the publish or receive pipeline.
//!
//! Pipeline entry points never return `Err`: every failure is converted to a
//! status transition or a no-op so a single bad record cannot stop a
//! coordinator.

use std::fmt;

/// Why a pipeline pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// Another node holds the lease.
    LockHeld,
    /// The record no longer exists (expired or rolled back).
    NotFound,
    /// Storage failed during lookup or leasing; the next retry pass revisits.
    StorageUnavailable,
    /// The record already reached `Succeeded`.
    AlreadySucceeded,
    /// No handler with the record's name is registered on this node.
    UnknownHandler,
}

impl NoOpReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoOpReason::LockHeld => "lock_held",
            NoOpReason::NotFound => "not_found",
            NoOpReason::StorageUnavailable => "storage_unavailable",
            NoOpReason::AlreadySucceeded => "already_succeeded",
            NoOpReason::UnknownHandler => "unknown_handler",
        }
    }
}

/// A send or handle attempt that failed and was recorded as `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    pub retry_count: u32,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Sent or handled, and recorded as `Succeeded`.
    Completed,
    /// Sent or handled, but the `Succeeded` write failed. The record stays
    /// stale and is left for operators; it is not resent automatically.
    Unrecorded,
    NoOp(NoOpReason),
    Failed(FailedAttempt),
}

impl HandleOutcome {
    /// False only when the attempt itself failed.
    pub fn is_success(&self) -> bool {
        !matches!(self, HandleOutcome::Failed(_))
    }

    /// True when the send or handler actually ran to completion.
    pub fn did_deliver(&self) -> bool {
        matches!(self, HandleOutcome::Completed | HandleOutcome::Unrecorded)
    }
}

impl fmt::Display for HandleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleOutcome::Completed => f.write_str("completed"),
            HandleOutcome::Unrecorded => f.write_str("unrecorded"),
            HandleOutcome::NoOp(reason) => write!(f, "no-op ({})", reason.as_str()),
            HandleOutcome::Failed(attempt) => {
                write!(f, "failed (attempt {}): {}", attempt.retry_count, attempt.error)
            }
        }
    }
}
