//! Task and worker state machines

use serde::{Deserialize, Serialize};

/// States of a request submitted to a `ConcurrencyContext`
///
/// `Queued -> Admitted -> Running -> Finished | Failed`; a request whose
/// priority cannot be computed goes straight from `Queued` to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Waiting for a free slot
    Queued,

    /// Picked by the admission pass, slot reserved
    Admitted,

    /// Worker launched
    Running,

    /// Worker reported a result
    Finished,

    /// Task, channel or priority evaluation failed
    Failed(String),
}

impl TaskState {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Failed(_))
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskState::Queued => "Queued",
            TaskState::Admitted => "Admitted",
            TaskState::Running => "Running",
            TaskState::Finished => "Finished",
            TaskState::Failed(_) => "Failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Lifecycle of a single-use worker process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Process started
    Spawned,

    /// Dispatch message sent, waiting for the worker to pick it up
    AwaitingDispatch,

    /// Worker is running the callable
    Executing,

    /// Completion message received
    Completed,

    /// Process died or closed its channel without a completion
    Crashed,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Completed | WorkerState::Crashed)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            WorkerState::Spawned => "spawned",
            WorkerState::AwaitingDispatch => "awaiting-dispatch",
            WorkerState::Executing => "executing",
            WorkerState::Completed => "completed",
            WorkerState::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
