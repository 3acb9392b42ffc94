//! Task definition and types

use crate::callable::CallableSource;
use branchy_foundation::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Unique identifier for a task invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// One unit of work, created per invocation of a `TaskFn`
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    /// Unique task identifier
    pub id: TaskId,

    /// What to run
    pub callable: CallableSource,

    /// Arguments, already in wire form
    pub args: Vec<Value>,

    /// File standing in for "where this code lives"
    pub context_path: PathBuf,

    /// When the descriptor was created
    pub created_at: DateTime<Utc>,
}

impl TaskDescriptor {
    pub fn new(callable: CallableSource, args: Vec<Value>, context_path: impl Into<PathBuf>) -> Self {
        Self {
            id: TaskId::new(),
            callable,
            args,
            context_path: context_path.into(),
            created_at: Utc::now(),
        }
    }

    /// Reuse an id handed out earlier (e.g. at queue time)
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Time since the descriptor was created
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Directory of the context path
    pub fn context_dir(&self) -> &Path {
        self.context_path.parent().unwrap_or_else(|| Path::new("/"))
    }
}

/// Pending result of a task invocation.
///
/// Work starts as soon as the handle is created; awaiting it only waits for
/// the outcome. Dropping it does not stop the worker.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId) -> (Self, oneshot::Sender<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        (Self { id, rx }, tx)
    }

    /// Handle that is already settled
    pub(crate) fn settled(id: TaskId, result: Result<Value>) -> Self {
        let (handle, tx) = Self::new(id);
        let _ = tx.send(result);
        handle
    }

    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl Future for TaskHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(Error::Internal(format!(
                    "task {} was dropped before it completed",
                    id
                )))
            })
        })
    }
}
