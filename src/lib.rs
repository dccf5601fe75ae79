//! Settle-once promises with deferred continuations.
//!
//! A [`Promise`] starts pending and is settled exactly once, either fulfilled
//! with a value or rejected with a reason. Continuations registered with
//! [`Promise::chain`], [`then`](Promise::then),
//! [`catch_error`](Promise::catch_error) or [`finally`](Promise::finally)
//! run on the promise's [`Scheduler`], never inline, in the order they were
//! registered. The four combinators in [`combinators`] aggregate many inputs
//! into one promise.
//!
//! ```
//! use promise_chain::{join_all, MicrotaskQueue, Promise};
//!
//! let queue = MicrotaskQueue::new();
//! let all: Promise<Vec<i32>, String> = join_all(
//!     queue.clone(),
//!     vec![
//!         Promise::<i32, String>::resolved(queue.clone(), 1),
//!         Promise::resolved(queue.clone(), 2),
//!     ],
//! );
//! queue.run_until_idle();
//! assert_eq!(all.peek(), Some(Ok(vec![1, 2])));
//! ```
pub mod combinators;
mod promise;
mod resolution;
mod scheduler;
mod state;
mod worker;

pub use combinators::{join_all, join_all_settled, race_first_settled, race_first_success, Settled};
pub use promise::{Promise, Resolver};
pub use resolution::{Resolution, Thenable};
pub use scheduler::{Immediate, MicrotaskQueue, Scheduler, SchedulerRef, Task};
pub use state::PromiseState;
pub use worker::{WorkerBuilder, WorkerScheduler};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A promise was asked to adopt its own state.
    #[error("a promise cannot be resolved with itself")]
    CyclicAdoption,
}

/// Every reason of a [`race_first_success`] whose inputs all failed, in input
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("all {} input(s) were rejected", .reasons.len())]
pub struct AggregateError<E> {
    pub reasons: Vec<E>,
}
