//! Concurrency options: limit, ordering, priority

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Higher runs first
pub type Priority = i64;

/// How many tasks may run at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Threads {
    Count(usize),
    /// One per logical CPU
    #[default]
    Auto,
}

impl Threads {
    pub fn resolve(self) -> usize {
        match self {
            Threads::Count(count) => count,
            Threads::Auto => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

impl From<usize> for Threads {
    fn from(count: usize) -> Self {
        Threads::Count(count)
    }
}

/// Order among pending tasks of equal priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// First in, first out
    #[default]
    Queue,
    /// Last in, first out
    Stack,
}

type SyncScore = dyn Fn(&[Value]) -> anyhow::Result<Priority> + Send + Sync;
type AsyncScore = dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Priority>> + Send + Sync;

/// Computes a task's priority from its arguments
#[derive(Clone)]
pub enum PriorityFn {
    Sync(Arc<SyncScore>),
    Async(Arc<AsyncScore>),
}

impl fmt::Debug for PriorityFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityFn::Sync(_) => f.write_str("PriorityFn::Sync"),
            PriorityFn::Async(_) => f.write_str("PriorityFn::Async"),
        }
    }
}

/// Options for a concurrency context
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyOptions {
    pub threads: Threads,
    pub priority: Option<PriorityFn>,
    pub strategy: Strategy,
}

impl ConcurrencyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: impl Into<Threads>) -> Self {
        self.threads = threads.into();
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Infallible priority
    pub fn priority<F>(self, score: F) -> Self
    where
        F: Fn(&[Value]) -> Priority + Send + Sync + 'static,
    {
        self.try_priority(move |args| Ok(score(args)))
    }

    /// Priority that may fail; a failure rejects that one call
    pub fn try_priority<F>(mut self, score: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Priority> + Send + Sync + 'static,
    {
        self.priority = Some(PriorityFn::Sync(Arc::new(score)));
        self
    }

    /// Priority computed asynchronously
    pub fn priority_async<F, Fut>(mut self, score: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Priority>> + Send + 'static,
    {
        self.priority = Some(PriorityFn::Async(Arc::new(move |args| score(args).boxed())));
        self
    }
}

impl From<usize> for ConcurrencyOptions {
    fn from(count: usize) -> Self {
        Self::new().threads(count)
    }
}

impl From<Threads> for ConcurrencyOptions {
    fn from(threads: Threads) -> Self {
        Self::new().threads(threads)
    }
}
