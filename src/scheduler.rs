//! The deferred-callback capability promises run their continuations on.
//!
//! A promise never runs a continuation inline. It hands a [`Task`] to the
//! [`Scheduler`] it was created with, and the host decides when that task
//! runs. The only requirement is FIFO: a task runs after the current
//! synchronous segment and before any task scheduled after it.
//!
//! A task that panics is logged and dropped; the scheduler keeps running the
//! tasks behind it.
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Shared handle to a scheduler, held by every promise.
pub type SchedulerRef = Arc<dyn Scheduler>;

/// Something that can run a [`Task`] "soon".
pub trait Scheduler: Send + Sync {
    fn schedule(&self, task: Task);
}

/// Runs `task`, containing any panic so it cannot unwind into the scheduler.
/// Returns `false` if the task panicked.
pub(crate) fn run_task(task: Task) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(()) => true,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("<non-string payload>");
            log::error!("scheduled task panicked: {message}");
            false
        }
    }
}

/// A manually stepped FIFO of tasks.
///
/// Nothing runs until the owner calls [`run_once`](Self::run_once) or
/// [`run_until_idle`](Self::run_until_idle), which makes the order in which
/// continuations fire fully observable.
///
/// # Examples
///
/// ```
/// use promise_chain::{MicrotaskQueue, Promise};
///
/// let queue = MicrotaskQueue::new();
/// let doubled = Promise::<i32, String>::resolved(queue.clone(), 21).then(|v| Ok(v * 2));
/// assert!(doubled.is_pending());
/// queue.run_until_idle();
/// assert_eq!(doubled.peek(), Some(Ok(42)));
/// ```
#[derive(Default)]
pub struct MicrotaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl MicrotaskQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs the oldest queued task. Returns `false` if the queue was empty.
    pub fn run_once(&self) -> bool {
        // The lock must be released before the task runs: the task is free to
        // schedule more work on this queue.
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match task {
            Some(task) => {
                run_task(task);
                true
            }
            None => false,
        }
    }

    /// Runs tasks, including ones scheduled while draining, until none are
    /// left. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
        }
        log::trace!("microtask queue idle after {ran} task(s)");
        ran
    }

    pub fn len(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Scheduler for MicrotaskQueue {
    fn schedule(&self, task: Task) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
    }
}

impl fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("queued", &self.len())
            .finish()
    }
}

/// Runs every task inline, at the moment it is scheduled.
///
/// This gives up the "never before the registering call returns" guarantee
/// and exists for tests that want settlement to propagate synchronously.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Immediate {
    pub fn new() -> Arc<Self> {
        Arc::new(Immediate)
    }
}

impl Scheduler for Immediate {
    fn schedule(&self, task: Task) {
        run_task(task);
    }
}
