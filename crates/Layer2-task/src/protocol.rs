//! Parent/worker wire protocol
//!
//! Newline-delimited JSON. The parent writes exactly one [`Dispatch`] line to
//! the worker's stdin; the worker writes exactly one [`Completion`] line to
//! its stdout and exits.

use crate::callable::CallableSource;
use crate::task::{TaskDescriptor, TaskId};
use branchy_foundation::{Error, Result, WorkerError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Context variables visible to the callable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextVars {
    pub file_path: PathBuf,
    pub dir_path: PathBuf,
}

/// Parent -> worker: run this
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispatch {
    pub id: TaskId,
    pub callable_source: CallableSource,
    pub args: Vec<Value>,
    pub context: ContextVars,
}

impl From<&TaskDescriptor> for Dispatch {
    fn from(descriptor: &TaskDescriptor) -> Self {
        Self {
            id: descriptor.id,
            callable_source: descriptor.callable.clone(),
            args: descriptor.args.clone(),
            context: ContextVars {
                file_path: descriptor.context_path.clone(),
                dir_path: descriptor.context_dir().to_path_buf(),
            },
        }
    }
}

/// Worker -> parent: the one and only reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Completion {
    Result {
        value: Value,
    },
    Error {
        name: String,
        message: String,
        stack: String,
    },
}

impl Completion {
    pub fn error(
        name: impl Into<String>,
        message: impl Into<String>,
        stack: impl Into<String>,
    ) -> Self {
        Completion::Error {
            name: name.into(),
            message: message.into(),
            stack: stack.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Completion::Error { .. })
    }

    /// Settle the caller's side: the value, or the translated task failure
    pub fn into_result(self) -> Result<Value> {
        match self {
            Completion::Result { value } => Ok(value),
            Completion::Error {
                name,
                message,
                stack,
            } => Err(Error::Worker(WorkerError::new(name, message, stack))),
        }
    }
}

/// Encode a message as one protocol line (trailing newline included)
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one protocol line
pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T> {
    serde_json::from_str(line.trim_end()).map_err(|e| Error::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completion_wire_shapes() {
        let ok = Completion::Result { value: json!(6) };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"type": "result", "value": 6})
        );

        let failed = Completion::error("TypeError", "bad", "    at <main> (/x.rs:1:1)");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({
                "type": "error",
                "name": "TypeError",
                "message": "bad",
                "stack": "    at <main> (/x.rs:1:1)"
            })
        );
    }

    #[test]
    fn test_dispatch_from_descriptor() {
        let descriptor = TaskDescriptor::new(
            CallableSource::Inline {
                source: "|x| x".into(),
            },
            vec![json!(1)],
            "/srv/app/jobs.rs",
        );
        let dispatch = Dispatch::from(&descriptor);

        let wire = serde_json::to_value(&dispatch).unwrap();
        assert_eq!(wire["callableSource"]["kind"], "inline");
        assert_eq!(wire["context"]["filePath"], "/srv/app/jobs.rs");
        assert_eq!(wire["context"]["dirPath"], "/srv/app");
        assert_eq!(wire["args"], json!([1]));
    }

    #[test]
    fn test_line_codec() {
        let line = encode_line(&Completion::Result { value: json!("foo") }).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let decoded: Completion = decode_line(&line).unwrap();
        assert_eq!(decoded.into_result().unwrap(), json!("foo"));
    }

    #[test]
    fn test_decode_garbage_is_protocol_error() {
        let err = decode_line::<Completion>("hello from a stray print").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_error_completion_into_worker_error() {
        let err = Completion::error("DomainError", "x", "")
            .into_result()
            .unwrap_err();
        let inner = err.worker_error().unwrap();
        assert_eq!(inner.name, "DomainError");
        assert_eq!(inner.message, "x");
    }
}
