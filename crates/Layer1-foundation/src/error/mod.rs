//! Error types for branchy
//!
//! Every failure a caller can observe funnels through [`Error`]. The two
//! kinds that matter most are kept apart on purpose:
//! - [`Error::ChannelFault`] - the worker process itself broke
//! - [`Error::Worker`] - the task ran and threw, see [`WorkerError`]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// branchy error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Worker execution
    // ========================================================================
    #[error("Worker channel fault: {0}")]
    ChannelFault(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // ========================================================================
    // Scheduling
    // ========================================================================
    #[error("Priority evaluation failed: {0}")]
    PriorityEvaluation(String),

    // ========================================================================
    // Resolution / configuration
    // ========================================================================
    #[error("Cannot find module '{descriptor}' from '{from}'")]
    ModuleNotFound { descriptor: String, from: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // External conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // Other
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The worker process failed before it could report a completion
    pub fn is_channel_fault(&self) -> bool {
        matches!(self, Error::ChannelFault(_))
    }

    /// The task ran and its callable threw
    pub fn is_task_failure(&self) -> bool {
        matches!(self, Error::Worker(_))
    }

    /// Inner failure report, if this is a task failure
    pub fn worker_error(&self) -> Option<&WorkerError> {
        match self {
            Error::Worker(e) => Some(e),
            _ => None,
        }
    }

    /// Module resolution error helper
    pub fn module_not_found(descriptor: impl Into<String>, from: impl fmt::Display) -> Self {
        Error::ModuleNotFound {
            descriptor: descriptor.into(),
            from: from.to_string(),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

// ============================================================================
// WorkerError
// ============================================================================

/// Failure raised by a task inside its worker process.
///
/// This is the one error kind callers see for "the task itself threw",
/// whatever the inner error was. The inner `name`, `message` and the already
/// remapped `stack` are kept verbatim and embedded, indented, in the display
/// text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerError {
    /// Inner error name (`TypeError`, `DomainError`, ...)
    pub name: String,

    /// Inner error message
    pub message: String,

    /// Stack trace, frames pointing at the task's context path
    pub stack: String,
}

impl WorkerError {
    pub fn new(
        name: impl Into<String>,
        message: impl Into<String>,
        stack: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: stack.into(),
        }
    }

    /// Stack frame lines, without indentation
    pub fn frames(&self) -> impl Iterator<Item = &str> {
        self.stack
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("at "))
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error in worker task:")?;

        let mut body = format!("{}: {}", self.name, self.message);
        if !self.stack.is_empty() {
            body.push('\n');
            body.push_str(&self.stack);
        }

        for line in body.lines() {
            writeln!(f, "    {}", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for WorkerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_error_display_indents_inner_report() {
        let err = WorkerError::new(
            "DomainError",
            "x",
            "    at <closure> (/tmp/task.rs:3:5)",
        );

        assert_eq!(
            err.to_string(),
            "Error in worker task:\n    DomainError: x\n        at <closure> (/tmp/task.rs:3:5)\n"
        );
    }

    #[test]
    fn test_worker_error_display_keeps_frame_nesting() {
        let err = WorkerError::new(
            "DomainError",
            "x",
            "    at inner (/m/a.rhai:2:5)\n    at <closure> (/tmp/task.rs:3:5)",
        );

        let rendered = err.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[1], "    DomainError: x");
        assert_eq!(lines[2], "        at inner (/m/a.rhai:2:5)");
        assert_eq!(lines[3], "        at <closure> (/tmp/task.rs:3:5)");
        assert_eq!(err.frames().count(), 2);
    }

    #[test]
    fn test_worker_error_without_stack() {
        let err = WorkerError::new("Error", "boom", "");
        assert_eq!(err.to_string(), "Error in worker task:\n    Error: boom\n");
        assert_eq!(err.frames().count(), 0);
    }

    #[test]
    fn test_error_kinds() {
        let fault = Error::ChannelFault("exited".into());
        assert!(fault.is_channel_fault());
        assert!(!fault.is_task_failure());
        assert!(fault.worker_error().is_none());

        let failure: Error = WorkerError::new("TypeError", "bad", "").into();
        assert!(failure.is_task_failure());
        assert_eq!(failure.worker_error().map(|e| e.name.as_str()), Some("TypeError"));
        // Transparent: the wrapped report is the whole message
        assert!(failure.to_string().starts_with("Error in worker task:"));
    }

    #[test]
    fn test_module_not_found_message() {
        let err = Error::module_not_found("./missing", "/srv/app/main.rhai");
        assert_eq!(
            err.to_string(),
            "Cannot find module './missing' from '/srv/app/main.rhai'"
        );
    }
}
