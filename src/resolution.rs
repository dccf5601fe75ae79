//! Deciding what a value used to settle a promise actually means.
//!
//! A handler or resolver can hand back a plain value, one of our own
//! promises, or a foreign [`Thenable`]. The latter two are followed until
//! they settle instead of being stored as the value.
use std::fmt;

use crate::promise::{Promise, Resolver};
use crate::scheduler::SchedulerRef;
use crate::Error;

/// An async value from outside this crate that can report its outcome.
///
/// # Examples
///
/// ```
/// use promise_chain::{MicrotaskQueue, Promise, Resolution, Resolver, Thenable};
///
/// struct Ready(u8);
///
/// impl Thenable<u8, String> for Ready {
///     fn then(self: Box<Self>, resolver: Resolver<u8, String>) -> Result<(), String> {
///         resolver.resolve(self.0);
///         Ok(())
///     }
/// }
///
/// let queue = MicrotaskQueue::new();
/// let ready = Resolution::thenable(Ready(9));
/// let promise = Promise::<u8, String>::resolve_from(queue.clone(), ready);
/// queue.run_until_idle();
/// assert_eq!(promise.peek(), Some(Ok(9)));
/// ```
pub trait Thenable<T, E>: Send + 'static {
    /// Subscribes `resolver` to the outcome. Only the first resolver call
    /// counts; an `Err` rejects unless the resolver was already used.
    fn then(self: Box<Self>, resolver: Resolver<T, E>) -> Result<(), E>;

    /// Our own promise, if this thenable is one. Lets native promises skip the
    /// generic subscription path.
    fn as_promise(&self) -> Option<&Promise<T, E>> {
        None
    }
}

impl<T, E> Thenable<T, E> for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn then(self: Box<Self>, resolver: Resolver<T, E>) -> Result<(), E> {
        self.subscribe(move |outcome| match outcome {
            Ok(value) => resolver.resolve(value),
            Err(reason) => resolver.reject(reason),
        });
        Ok(())
    }

    fn as_promise(&self) -> Option<&Promise<T, E>> {
        Some(self)
    }
}

/// What a promise is being resolved with.
pub enum Resolution<T, E> {
    Value(T),
    Promise(Promise<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn thenable<A>(thenable: A) -> Self
    where
        A: Thenable<T, E>,
    {
        Resolution::Thenable(Box::new(thenable))
    }

    /// Settles `target` now, or subscribes it to the async value.
    ///
    /// Fails with [`Error::CyclicAdoption`], leaving `target` untouched, when
    /// the async value is `target` itself.
    pub(crate) fn settle_into(self, target: &Promise<T, E>) -> Result<(), Error> {
        match self {
            Resolution::Value(value) => {
                target.settle(Ok(value));
                Ok(())
            }
            Resolution::Promise(source) => follow(target, &source),
            Resolution::Thenable(thenable) => match thenable.as_promise() {
                Some(source) => follow(target, source),
                None => {
                    follow_thenable(target, thenable);
                    Ok(())
                }
            },
        }
    }

    /// A promise standing for this resolution. Native promises are returned
    /// as they are.
    pub(crate) fn into_promise(self, scheduler: SchedulerRef) -> Promise<T, E> {
        match self {
            Resolution::Value(value) => Promise::resolved(scheduler, value),
            Resolution::Promise(promise) => promise,
            Resolution::Thenable(thenable) => match thenable.as_promise() {
                Some(promise) => promise.clone(),
                None => {
                    let target = Promise::pending(scheduler);
                    follow_thenable(&target, thenable);
                    target
                }
            },
        }
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T, E> From<Box<dyn Thenable<T, E>>> for Resolution<T, E> {
    fn from(thenable: Box<dyn Thenable<T, E>>) -> Self {
        Resolution::Thenable(thenable)
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

fn follow<T, E>(target: &Promise<T, E>, source: &Promise<T, E>) -> Result<(), Error>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    if source.ptr_eq(target) {
        return Err(Error::CyclicAdoption);
    }
    log::debug!("promise adopting the state of another promise");
    let target = target.clone();
    source.subscribe(move |outcome| {
        target.settle(outcome);
    });
    Ok(())
}

fn follow_thenable<T, E>(target: &Promise<T, E>, thenable: Box<dyn Thenable<T, E>>)
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    log::debug!("promise following a foreign thenable");
    let resolver = Resolver::new(target.clone());
    if let Err(reason) = thenable.then(resolver.clone()) {
        resolver.reject(reason);
    }
}
