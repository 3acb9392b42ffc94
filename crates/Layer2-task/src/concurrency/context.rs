//! Concurrency context - bounded admission shared by any number of tasks

use super::options::{ConcurrencyOptions, Priority, PriorityFn, Strategy};
use crate::state::TaskState;
use crate::task::{TaskHandle, TaskId};
use async_trait::async_trait;
use branchy_foundation::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

/// Capacity of the event channel; slow subscribers miss old events
const EVENT_CAPACITY: usize = 256;

/// Something the context can start once a slot is free
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, id: TaskId, args: Vec<Value>) -> Result<Value>;
}

/// State change of one request
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEvent {
    pub task_id: TaskId,
    pub state: TaskState,
    pub at: DateTime<Utc>,
}

struct Request {
    id: TaskId,
    runner: Arc<dyn TaskRunner>,
    args: Vec<Value>,
    reply: oneshot::Sender<Result<Value>>,
}

struct Pending {
    priority: Priority,
    /// Arrival order turned into rank: later is higher for `Stack`, lower for `Queue`
    order: u64,
    request: Request,
}

impl Pending {
    fn key(&self) -> (Priority, u64) {
        (self.priority, self.order)
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Default)]
struct QueueState {
    running: usize,
    pending: BinaryHeap<Pending>,
    next_seq: u64,
}

struct ContextInner {
    limit: usize,
    strategy: Strategy,
    priority: Option<PriorityFn>,
    state: Mutex<QueueState>,
    events: broadcast::Sender<ContextEvent>,
}

/// Shared admission queue.
///
/// Cloning is cheap and every clone is the same context: tasks created with
/// clones of one context share its limit.
#[derive(Clone)]
pub struct ConcurrencyContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for ConcurrencyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyContext")
            .field("limit", &self.inner.limit)
            .field("strategy", &self.inner.strategy)
            .field("running", &self.running())
            .field("pending", &self.pending())
            .finish()
    }
}

impl ConcurrencyContext {
    pub fn new(options: impl Into<ConcurrencyOptions>) -> Result<Self> {
        let options = options.into();
        let limit = options.threads.resolve();
        if limit == 0 {
            return Err(Error::InvalidInput(
                "concurrency limit must be at least 1".to_string(),
            ));
        }

        debug!(
            limit,
            strategy = ?options.strategy,
            prioritized = options.priority.is_some(),
            "Created concurrency context"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(ContextInner {
                limit,
                strategy: options.strategy,
                priority: options.priority,
                state: Mutex::new(QueueState::default()),
                events,
            }),
        })
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn strategy(&self) -> Strategy {
        self.inner.strategy
    }

    /// Tasks currently holding a slot
    pub fn running(&self) -> usize {
        self.inner.state.lock().running
    }

    /// Tasks waiting for a slot (priority already known)
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Subscribe to state changes of every request in this context
    pub fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.inner.events.subscribe()
    }

    /// Whether two handles refer to the same context
    pub fn same_as(&self, other: &ConcurrencyContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queue a request; it starts as soon as ordering and the limit allow.
    ///
    /// Needs a Tokio runtime; without one the handle settles with an error.
    pub fn push(&self, runner: Arc<dyn TaskRunner>, args: Vec<Value>) -> TaskHandle {
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
        let request = Request {
            id,
            runner,
            args,
            reply,
        };

        // Arrival order is fixed now, even if scoring finishes later
        let seq = {
            let mut state = self.inner.state.lock();
            state.next_seq += 1;
            state.next_seq
        };
        self.emit(id, TaskState::Queued);

        match self.inner.priority.clone() {
            None => self.enqueue(request, 0, seq),
            Some(PriorityFn::Sync(score)) => match score(&request.args) {
                Ok(priority) => self.enqueue(request, priority, seq),
                Err(e) => self.reject(request, e),
            },
            Some(PriorityFn::Async(score)) => {
                let scoring = score(request.args.clone());
                let context = self.clone();
                runtime.spawn(async move {
                    match scoring.await {
                        Ok(priority) => context.enqueue(request, priority, seq),
                        Err(e) => context.reject(request, e),
                    }
                });
            }
        }

        handle
    }

    fn emit(&self, task_id: TaskId, state: TaskState) {
        if state.is_terminal() {
            debug!(task = %task_id, state = %state, running = self.running(), "Request settled");
        }
        // No subscribers is fine
        let _ = self.inner.events.send(ContextEvent {
            task_id,
            state,
            at: Utc::now(),
        });
    }

    fn reject(&self, request: Request, err: anyhow::Error) {
        let message = format!("{:#}", err);
        warn!(task = %request.id, "Priority evaluation failed: {}", message);
        self.emit(request.id, TaskState::Failed(message.clone()));
        let _ = request.reply.send(Err(Error::PriorityEvaluation(message)));
    }

    fn enqueue(&self, request: Request, priority: Priority, seq: u64) {
        let order = match self.inner.strategy {
            Strategy::Queue => u64::MAX - seq,
            Strategy::Stack => seq,
        };

        {
            let mut state = self.inner.state.lock();
            state.pending.push(Pending {
                priority,
                order,
                request,
            });
        }

        self.admit();
    }

    /// Start pending requests while slots are free
    fn admit(&self) {
        loop {
            let next = {
                let mut state = self.inner.state.lock();
                if state.running >= self.inner.limit {
                    None
                } else {
                    let next = state.pending.pop();
                    if next.is_some() {
                        state.running += 1;
                    }
                    next
                }
            };

            let Some(Pending { request, .. }) = next else {
                break;
            };

            self.emit(request.id, TaskState::Admitted);
            let slot = Slot {
                context: self.clone(),
                released: false,
            };

            match Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(run(slot, request));
                }
                Err(_) => {
                    let _ = request.reply.send(Err(Error::Internal(
                        "runtime shut down before the task could start".to_string(),
                    )));
                    let mut slot = slot;
                    slot.release();
                }
            }
        }
    }
}

/// A held slot; released exactly once, even if the runner panics
struct Slot {
    context: ConcurrencyContext,
    released: bool,
}

impl Slot {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            let mut state = self.context.inner.state.lock();
            state.running = state.running.saturating_sub(1);
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if !self.released {
            self.release();
            self.context.admit();
        }
    }
}

async fn run(mut slot: Slot, request: Request) {
    let Request {
        id,
        runner,
        args,
        reply,
    } = request;

    slot.context.emit(id, TaskState::Running);
    let result = runner.run(id, args).await;

    slot.release();
    match &result {
        Ok(_) => slot.context.emit(id, TaskState::Finished),
        Err(e) => slot.context.emit(id, TaskState::Failed(e.to_string())),
    }
    let _ = reply.send(result);

    slot.context.admit();
}
