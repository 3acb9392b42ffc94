//! Task factory
//!
//! `create_task` turns a callable into a [`TaskFn`]: calling it runs the
//! callable in a fresh worker process and hands back a [`TaskHandle`] for the
//! result. With a concurrency setting, calls go through a
//! [`ConcurrencyContext`] instead of starting straight away.

use crate::callable::{
    absolute_path, context_path_from_location, resolve_module, Callable, CallableSource,
};
use crate::channel::{Launcher, ProcessLauncher, WorkerCommand};
use crate::concurrency::{ConcurrencyContext, ConcurrencyOptions, TaskRunner, Threads};
use crate::protocol::Dispatch;
use crate::task::{TaskDescriptor, TaskHandle, TaskId};
use async_trait::async_trait;
use branchy_foundation::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// How calls of one task are admitted
#[derive(Debug, Clone, Default)]
pub enum Concurrency {
    /// Every call starts immediately
    #[default]
    Unlimited,

    /// Private context with this many slots
    Limit(usize),

    /// Private context with one slot per CPU
    Auto,

    /// Context shared with other tasks
    Shared(ConcurrencyContext),

    /// Private context built from full options
    Options(ConcurrencyOptions),
}

impl From<usize> for Concurrency {
    fn from(limit: usize) -> Self {
        Concurrency::Limit(limit)
    }
}

impl From<Threads> for Concurrency {
    fn from(threads: Threads) -> Self {
        match threads {
            Threads::Count(limit) => Concurrency::Limit(limit),
            Threads::Auto => Concurrency::Auto,
        }
    }
}

impl From<ConcurrencyContext> for Concurrency {
    fn from(context: ConcurrencyContext) -> Self {
        Concurrency::Shared(context)
    }
}

impl From<&ConcurrencyContext> for Concurrency {
    fn from(context: &ConcurrencyContext) -> Self {
        Concurrency::Shared(context.clone())
    }
}

impl From<ConcurrencyOptions> for Concurrency {
    fn from(options: ConcurrencyOptions) -> Self {
        Concurrency::Options(options)
    }
}

impl Concurrency {
    fn into_context(self) -> Result<Option<ConcurrencyContext>> {
        match self {
            Concurrency::Unlimited => Ok(None),
            Concurrency::Limit(limit) => ConcurrencyContext::new(limit).map(Some),
            Concurrency::Auto => ConcurrencyContext::new(Threads::Auto).map(Some),
            Concurrency::Shared(context) => Ok(Some(context)),
            Concurrency::Options(options) => ConcurrencyContext::new(options).map(Some),
        }
    }
}

/// Options for [`create_task`]
#[derive(Clone, Default)]
pub struct TaskOptions {
    pub concurrent: Concurrency,

    /// Overrides the caller's source file as the task's context path
    pub context_path: Option<PathBuf>,

    /// Defaults to a process launcher running the discovered worker
    pub launcher: Option<Arc<dyn Launcher>>,
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("concurrent", &self.concurrent)
            .field("context_path", &self.context_path)
            .field("launcher", &self.launcher.as_ref().map(|l| l.name()))
            .finish()
    }
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrent(mut self, concurrent: impl Into<Concurrency>) -> Self {
        self.concurrent = concurrent.into();
        self
    }

    pub fn context_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.context_path = Some(path.into());
        self
    }

    pub fn launcher(mut self, launcher: impl Launcher + 'static) -> Self {
        self.launcher = Some(Arc::new(launcher));
        self
    }

    /// Run workers with this command instead of the discovered one
    pub fn worker(self, command: WorkerCommand) -> Self {
        self.launcher(ProcessLauncher::new(command))
    }
}

struct TaskInner {
    source: CallableSource,
    context_path: PathBuf,
    launcher: Arc<dyn Launcher>,
}

#[async_trait]
impl TaskRunner for TaskInner {
    async fn run(&self, id: TaskId, args: Vec<Value>) -> Result<Value> {
        let descriptor =
            TaskDescriptor::new(self.source.clone(), args, self.context_path.clone()).with_id(id);

        debug!(
            task = %id,
            kind = self.source.kind(),
            launcher = self.launcher.name(),
            "Launching task"
        );
        let outcome = self.launcher.launch(Dispatch::from(&descriptor)).await;
        debug!(
            task = %id,
            elapsed_ms = descriptor.elapsed().num_milliseconds(),
            failed = !matches!(&outcome, Ok(completion) if !completion.is_error()),
            "Task settled"
        );
        outcome?.into_result()
    }
}

/// Offloaded callable. Clones share the callable and, if any, its context.
#[derive(Clone)]
pub struct TaskFn {
    inner: Arc<TaskInner>,
    context: Option<ConcurrencyContext>,
}

impl fmt::Debug for TaskFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFn")
            .field("callable", &self.inner.source)
            .field("context_path", &self.inner.context_path)
            .field("concurrency", &self.context)
            .finish()
    }
}

impl TaskFn {
    /// Start one invocation. Work begins before the handle is awaited.
    ///
    /// Needs a Tokio runtime; without one the handle settles with an error.
    pub fn call(&self, args: Vec<Value>) -> TaskHandle {
        if let Some(context) = &self.context {
            return context.push(self.inner.clone(), args);
        }

        let id = TaskId::new();
        let Ok(runtime) = Handle::try_current() else {
            return TaskHandle::settled(
                id,
                Err(Error::Internal(
                    "tasks can only be started inside a Tokio runtime".to_string(),
                )),
            );
        };

        let (handle, reply) = TaskHandle::new(id);
        let inner = self.inner.clone();
        runtime.spawn(async move {
            let _ = reply.send(inner.run(id, args).await);
        });
        handle
    }

    /// File the callable treats as its own location
    pub fn context_path(&self) -> &Path {
        &self.inner.context_path
    }

    pub fn callable(&self) -> &CallableSource {
        &self.inner.source
    }

    pub fn concurrency(&self) -> Option<&ConcurrencyContext> {
        self.context.as_ref()
    }
}

/// Create an offloaded task.
///
/// The context path defaults to the source file of the call site. Module
/// descriptors are resolved here, relative to that path, so a missing module
/// fails now rather than on the first call.
#[track_caller]
pub fn create_task(callable: impl Into<Callable>, options: TaskOptions) -> Result<TaskFn> {
    let caller = Location::caller();
    let TaskOptions {
        concurrent,
        context_path,
        launcher,
    } = options;

    let caller_path = match context_path {
        Some(path) => absolute_path(&path),
        None => context_path_from_location(caller.file()),
    };

    let (source, context_path) = match callable.into() {
        Callable::Inline(source) => (CallableSource::Inline { source }, caller_path),
        Callable::Module(descriptor) => {
            let path = resolve_module(&descriptor, &caller_path)?;
            (CallableSource::Module { path: path.clone() }, path)
        }
    };

    let launcher = match launcher {
        Some(launcher) => launcher,
        None => Arc::new(ProcessLauncher::new(WorkerCommand::discover()?)),
    };

    let context = concurrent.into_context()?;

    info!(
        kind = source.kind(),
        context = %context_path.display(),
        limit = context.as_ref().map(ConcurrencyContext::limit),
        "Created task"
    );

    Ok(TaskFn {
        inner: Arc::new(TaskInner {
            source,
            context_path,
            launcher,
        }),
        context,
    })
}
