//! Concurrency contexts
//!
//! A context is a queue with a limit: tasks pushed into it wait until fewer
//! than `limit` of its tasks are running, then start in priority order, ties
//! broken by arrival (`Strategy::Queue`) or reverse arrival (`Strategy::Stack`).

mod context;
mod options;

pub use context::{ConcurrencyContext, ContextEvent, TaskRunner};
pub use options::{ConcurrencyOptions, Priority, PriorityFn, Strategy, Threads};

use branchy_foundation::Result;

/// Create a context that several tasks can share
pub fn create_context(options: impl Into<ConcurrencyOptions>) -> Result<ConcurrencyContext> {
    ConcurrencyContext::new(options)
}
