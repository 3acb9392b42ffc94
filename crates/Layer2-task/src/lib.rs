//! # branchy-task
//!
//! Offload work to single-use worker processes.
//! A task is created from a callable and called like a function; every call
//! runs in its own `branchy-worker` process and resolves to the callable's
//! return value or to the error it raised.
//!
//! ## Features
//!
//! - Inline script callables and module files
//! - Worker-side errors carried back with remapped stack traces
//! - Bounded concurrency, shareable across tasks
//! - FIFO or LIFO admission, with optional per-call priority
//!
//! ```no_run
//! use branchy_task::{create_task, Callable, TaskOptions};
//! use serde_json::json;
//!
//! # async fn demo() -> branchy_foundation::Result<()> {
//! let sum = create_task(Callable::inline("|a, b, c| a + b + c"), TaskOptions::new())?;
//! assert_eq!(sum.call(vec![json!(1), json!(2), json!(3)]).await?, json!(6));
//! # Ok(())
//! # }
//! ```

pub mod callable;
pub mod channel;
pub mod concurrency;
pub mod factory;
pub mod protocol;
pub mod runtime;
pub mod stack;
pub mod state;
pub mod task;

// Task system
pub use callable::{Callable, CallableSource};
pub use factory::{create_task, Concurrency, TaskFn, TaskOptions};
pub use state::{TaskState, WorkerState};
pub use task::{TaskDescriptor, TaskHandle, TaskId};

// Concurrency
pub use concurrency::{
    create_context, ConcurrencyContext, ConcurrencyOptions, ContextEvent, Priority, PriorityFn,
    Strategy, TaskRunner, Threads,
};

// Worker channel
pub use channel::{Launcher, ProcessLauncher, WorkerCommand, DEFAULT_WORKER_PROGRAM};
pub use protocol::{Completion, ContextVars, Dispatch};
pub use runtime::WorkerRuntime;
