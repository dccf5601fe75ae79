//! The settle-once state machine shared by every handle to a promise.
use std::fmt;
use std::task::Waker;

/// A continuation waiting for settlement. It receives the outcome and picks
/// its success or failure arm itself, so one FIFO preserves registration
/// order across both arms.
pub(crate) type Reaction<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

/// Observable lifecycle of a promise. Never moves back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

pub(crate) enum State<T, E> {
    Pending {
        reactions: Vec<Reaction<T, E>>,
        wakers: Vec<Waker>,
    },
    Fulfilled(T),
    Rejected(E),
}

/// Everything a settle call has to hand out once the lock is released.
pub(crate) struct Settlement<T, E> {
    pub(crate) outcome: Result<T, E>,
    pub(crate) reactions: Vec<Reaction<T, E>>,
    pub(crate) wakers: Vec<Waker>,
}

pub(crate) struct Inner<T, E> {
    state: State<T, E>,
}

impl<T, E> Inner<T, E>
where
    T: Clone,
    E: Clone,
{
    pub(crate) fn new() -> Self {
        Inner {
            state: State::Pending {
                reactions: vec![],
                wakers: vec![],
            },
        }
    }

    pub(crate) fn state(&self) -> PromiseState {
        match self.state {
            State::Pending { .. } => PromiseState::Pending,
            State::Fulfilled(_) => PromiseState::Fulfilled,
            State::Rejected(_) => PromiseState::Rejected,
        }
    }

    pub(crate) fn outcome(&self) -> Option<Result<T, E>> {
        match &self.state {
            State::Pending { .. } => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Records the outcome if still pending and drains the queue.
    ///
    /// Returns `None` when the promise was already settled: the first write
    /// wins and later ones are ignored.
    pub(crate) fn settle(&mut self, outcome: Result<T, E>) -> Option<Settlement<T, E>> {
        let settled = match &outcome {
            Ok(value) => State::Fulfilled(value.clone()),
            Err(reason) => State::Rejected(reason.clone()),
        };
        match std::mem::replace(&mut self.state, settled) {
            State::Pending { reactions, wakers } => Some(Settlement {
                outcome,
                reactions,
                wakers,
            }),
            previous => {
                self.state = previous;
                None
            }
        }
    }

    /// Queues `reaction` while pending. Once settled the reaction is handed
    /// back together with a copy of the outcome, for the caller to schedule.
    pub(crate) fn register(
        &mut self,
        reaction: Reaction<T, E>,
    ) -> Option<(Reaction<T, E>, Result<T, E>)> {
        match &mut self.state {
            State::Pending { reactions, .. } => {
                reactions.push(reaction);
                None
            }
            State::Fulfilled(value) => Some((reaction, Ok(value.clone()))),
            State::Rejected(reason) => Some((reaction, Err(reason.clone()))),
        }
    }

    /// The outcome if settled, otherwise remembers `waker` for settlement.
    pub(crate) fn poll_outcome(&mut self, waker: &Waker) -> Option<Result<T, E>> {
        match &mut self.state {
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(waker)) {
                    wakers.push(waker.clone());
                }
                None
            }
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Inner<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Pending { reactions, wakers } => f
                .debug_struct("Pending")
                .field("reactions", &reactions.len())
                .field("wakers", &wakers.len())
                .finish(),
            State::Fulfilled(value) => f.debug_tuple("Fulfilled").field(value).finish(),
            State::Rejected(reason) => f.debug_tuple("Rejected").field(reason).finish(),
        }
    }
}
