//! The promise handle, its settle capabilities and chaining.
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use crate::resolution::Resolution;
use crate::scheduler::SchedulerRef;
use crate::state::{Inner, PromiseState, Settlement};
use crate::Error;

/// A settle-once container for a value of type `T` or a failure `E`.
///
/// Cloning the handle is cheap and every clone observes the same state.
/// Continuations registered with [`chain`](Self::chain) and friends never run
/// inline: they are handed to the promise's [`Scheduler`](crate::Scheduler)
/// and fire in registration order.
///
/// # Examples
///
/// ```
/// use promise_chain::{MicrotaskQueue, Promise};
///
/// let queue = MicrotaskQueue::new();
/// let promise = Promise::<String, String>::new(queue.clone(), |resolver| {
///     resolver.resolve("🍓".into());
///     Ok(())
/// });
/// let greeting = promise.then(|fruit| Ok(format!("got {fruit}")));
/// queue.run_until_idle();
/// assert_eq!(greeting.peek(), Some(Ok("got 🍓".to_string())));
/// ```
pub struct Promise<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
    scheduler: SchedulerRef,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a promise and runs `initializer` synchronously with its
    /// [`Resolver`].
    ///
    /// An `Err` returned by the initializer rejects the promise, unless the
    /// initializer already settled it.
    pub fn new<F>(scheduler: SchedulerRef, initializer: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let (promise, resolver) = Self::deferred(scheduler);
        if let Err(reason) = initializer(resolver.clone()) {
            log::debug!("promise initializer failed");
            resolver.reject(reason);
        }
        promise
    }

    /// A pending promise together with the capability that settles it.
    pub fn deferred(scheduler: SchedulerRef) -> (Self, Resolver<T, E>) {
        let promise = Self::pending(scheduler);
        let resolver = Resolver::new(promise.clone());
        (promise, resolver)
    }

    /// An already fulfilled promise.
    pub fn resolved(scheduler: SchedulerRef, value: T) -> Self {
        let promise = Self::pending(scheduler);
        promise.settle(Ok(value));
        promise
    }

    /// An already rejected promise. `reason` is stored as is.
    pub fn rejected(scheduler: SchedulerRef, reason: E) -> Self {
        let promise = Self::pending(scheduler);
        promise.settle(Err(reason));
        promise
    }

    /// A promise for `resolution`: plain values are fulfilled right away,
    /// native promises are returned as they are and foreign thenables are
    /// followed.
    pub fn resolve_from<R>(scheduler: SchedulerRef, resolution: R) -> Self
    where
        R: Into<Resolution<T, E>>,
    {
        resolution.into().into_promise(scheduler)
    }

    pub(crate) fn pending(scheduler: SchedulerRef) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
            scheduler,
        }
    }

    pub fn state(&self) -> PromiseState {
        self.lock().state()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// A copy of the outcome, or `None` while pending.
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.lock().outcome()
    }

    pub fn scheduler(&self) -> &SchedulerRef {
        &self.scheduler
    }

    /// Whether both handles point at the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registers a pair of continuations and returns the promise for their
    /// result.
    ///
    /// The handler matching the outcome runs on the scheduler. Returning
    /// `Err` rejects the returned promise; returning `Ok` resolves it with
    /// the [`Resolution`], adopting the state of a returned promise or
    /// thenable.
    pub fn chain<T2, E2, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<T2, E2>
    where
        T2: Clone + Send + 'static,
        E2: Clone + Send + From<Error> + 'static,
        F: FnOnce(T) -> Result<Resolution<T2, E2>, E2> + Send + 'static,
        R: FnOnce(E) -> Result<Resolution<T2, E2>, E2> + Send + 'static,
    {
        self.derive(move |outcome, next| {
            let produced = match outcome {
                Ok(value) => on_fulfilled(value),
                Err(reason) => on_rejected(reason),
            };
            match produced {
                Ok(resolution) => next.resolve_with(resolution),
                Err(reason) => {
                    next.settle(Err(reason));
                }
            }
        })
    }

    /// Maps the success value. Failures pass through unchanged.
    pub fn then<T2, F>(&self, on_fulfilled: F) -> Promise<T2, E>
    where
        T2: Clone + Send + 'static,
        F: FnOnce(T) -> Result<T2, E> + Send + 'static,
    {
        self.derive(move |outcome, next| {
            next.settle(outcome.and_then(on_fulfilled));
        })
    }

    /// Continues with the promise produced from the success value.
    pub fn and_then<T2, F>(&self, on_fulfilled: F) -> Promise<T2, E>
    where
        T2: Clone + Send + 'static,
        E: From<Error>,
        F: FnOnce(T) -> Promise<T2, E> + Send + 'static,
    {
        self.derive(move |outcome, next| match outcome {
            Ok(value) => next.resolve_with(on_fulfilled(value).into()),
            Err(reason) => {
                next.settle(Err(reason));
            }
        })
    }

    /// Handles a failure. Success values pass through unchanged.
    ///
    /// The handler can recover with a plain value or with a promise or
    /// thenable to adopt, exactly like the rejection arm of
    /// [`chain`](Self::chain).
    pub fn catch_error<E2, F>(&self, on_rejected: F) -> Promise<T, E2>
    where
        E2: Clone + Send + From<Error> + 'static,
        F: FnOnce(E) -> Result<Resolution<T, E2>, E2> + Send + 'static,
    {
        self.chain(|value| Ok(Resolution::Value(value)), on_rejected)
    }

    /// Runs `on_finally` whichever way the promise settles and forwards the
    /// original outcome. A failing finalizer rejects with its own error.
    pub fn finally<F>(&self, on_finally: F) -> Promise<T, E>
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        self.derive(move |outcome, next| {
            next.settle(on_finally().and(outcome));
        })
    }

    /// Creates the downstream promise and registers `handler` to settle it.
    fn derive<T2, E2, F>(&self, handler: F) -> Promise<T2, E2>
    where
        T2: Clone + Send + 'static,
        E2: Clone + Send + 'static,
        F: FnOnce(Result<T, E>, &Promise<T2, E2>) + Send + 'static,
    {
        let next = Promise::pending(self.scheduler.clone());
        let target = next.clone();
        self.subscribe(move |outcome| handler(outcome, &target));
        next
    }

    /// Queues `reaction`, or schedules it at once if already settled.
    pub(crate) fn subscribe<F>(&self, reaction: F)
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        let ready = self.lock().register(Box::new(reaction));
        if let Some((reaction, outcome)) = ready {
            self.scheduler.schedule(Box::new(move || reaction(outcome)));
        }
    }

    /// Records the outcome. Returns `false` if the promise was already
    /// settled, in which case nothing changes.
    pub(crate) fn settle(&self, outcome: Result<T, E>) -> bool {
        let settlement = self.lock().settle(outcome);
        match settlement {
            Some(settlement) => {
                self.dispatch(settlement);
                true
            }
            None => {
                log::trace!("ignoring settle on an already settled promise");
                false
            }
        }
    }

    /// Runs the resolution procedure against this promise, rejecting it if
    /// it would adopt itself.
    pub(crate) fn resolve_with(&self, resolution: Resolution<T, E>)
    where
        E: From<Error>,
    {
        if let Err(err) = resolution.settle_into(self) {
            log::warn!("{err}");
            self.settle(Err(err.into()));
        }
    }

    fn dispatch(&self, settlement: Settlement<T, E>) {
        let Settlement {
            outcome,
            reactions,
            wakers,
        } = settlement;
        log::trace!(
            "promise {}, dispatching {} reaction(s)",
            if outcome.is_ok() { "fulfilled" } else { "rejected" },
            reactions.len()
        );
        for reaction in reactions {
            let outcome = outcome.clone();
            self.scheduler.schedule(Box::new(move || reaction(outcome)));
        }
        for waker in wakers {
            waker.wake();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        // User code never runs under this lock.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, E> std::future::Future for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.lock().poll_outcome(cx.waker()) {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_tuple("Promise").field(&*inner).finish()
    }
}

/// The settle capabilities of one promise.
///
/// Clones share a single "already resolved" flag: whichever of
/// [`resolve`](Self::resolve), [`reject`](Self::reject) or
/// [`adopt`](Self::adopt) is called first decides the outcome and every
/// later call is ignored, even while an adopted promise is still pending.
pub struct Resolver<T, E> {
    promise: Promise<T, E>,
    used: Arc<AtomicBool>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            used: self.used.clone(),
        }
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(crate) fn new(promise: Promise<T, E>) -> Self {
        Self {
            promise,
            used: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn resolve(&self, value: T) {
        if self.claim() {
            self.promise.settle(Ok(value));
        }
    }

    pub fn reject(&self, reason: E) {
        if self.claim() {
            self.promise.settle(Err(reason));
        }
    }

    /// Resolves with a plain value, or follows a promise or thenable until it
    /// settles. Adopting the promise this resolver belongs to rejects it with
    /// [`Error::CyclicAdoption`].
    pub fn adopt<R>(&self, resolution: R)
    where
        R: Into<Resolution<T, E>>,
        E: From<Error>,
    {
        if self.claim() {
            self.promise.resolve_with(resolution.into());
        }
    }

    /// The promise this resolver settles.
    pub fn promise(&self) -> &Promise<T, E> {
        &self.promise
    }

    fn claim(&self) -> bool {
        let first = !self.used.swap(true, Ordering::AcqRel);
        if !first {
            log::trace!("resolver already used, ignoring");
        }
        first
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("promise", &self.promise)
            .field("used", &self.used.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Immediate, MicrotaskQueue};

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Cycle,
        Msg(&'static str),
    }

    impl From<Error> for TestError {
        fn from(_: Error) -> Self {
            TestError::Cycle
        }
    }

    #[test]
    fn test_initializer_runs_synchronously() {
        let queue = MicrotaskQueue::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let promise = Promise::<i32, String>::new(queue.clone(), move |resolver| {
            flag.store(true, Ordering::SeqCst);
            resolver.resolve(1);
            Ok(())
        });
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(promise.peek(), Some(Ok(1)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_initializer_error_rejects() {
        let queue = MicrotaskQueue::new();
        let promise = Promise::<i32, String>::new(queue, |_| Err("bad init".into()));
        assert_eq!(promise.state(), PromiseState::Rejected);
        assert_eq!(promise.peek(), Some(Err("bad init".to_string())));
    }

    #[test]
    fn test_initializer_error_after_resolve_is_ignored() {
        let queue = MicrotaskQueue::new();
        let promise = Promise::<i32, String>::new(queue, |resolver| {
            resolver.resolve(3);
            Err("too late".into())
        });
        assert_eq!(promise.peek(), Some(Ok(3)));
    }

    #[test]
    fn test_resolver_first_call_wins() {
        let queue = MicrotaskQueue::new();
        let (promise, resolver) = Promise::<i32, String>::deferred(queue);
        resolver.reject("first".into());
        resolver.resolve(2);
        resolver.clone().reject("third".into());
        assert_eq!(promise.peek(), Some(Err("first".to_string())));
    }

    #[test]
    fn test_chain_on_settled_promise_is_deferred() {
        let queue = MicrotaskQueue::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let promise = Promise::<i32, String>::resolved(queue.clone(), 1);
        let next = promise.then(move |v| {
            flag.store(true, Ordering::SeqCst);
            Ok(v + 1)
        });
        assert!(!ran.load(Ordering::SeqCst));
        assert!(next.is_pending());
        queue.run_until_idle();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(next.peek(), Some(Ok(2)));
    }

    #[test]
    fn test_continuations_fire_in_registration_order() {
        let queue = MicrotaskQueue::new();
        let (promise, resolver) = Promise::<i32, String>::deferred(queue.clone());
        let order = Arc::new(Mutex::new(vec![]));
        for tag in ["A", "B", "C"] {
            let order = order.clone();
            promise.then(move |v| {
                order.lock().unwrap().push(tag);
                Ok(v)
            });
        }
        queue.run_until_idle();
        assert!(order.lock().unwrap().is_empty());
        resolver.resolve(0);
        queue.run_until_idle();
        assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_handler_error_rejects_downstream() {
        let queue = MicrotaskQueue::new();
        let failed = Promise::<i32, TestError>::resolved(queue.clone(), 1)
            .then(|_| Err::<i32, _>(TestError::Msg("handler")));
        let recovered = failed.catch_error(|e| match e {
            TestError::Msg(m) => Ok(Resolution::Value(m.len() as i32)),
            other => Err(other),
        });
        queue.run_until_idle();
        assert_eq!(failed.peek(), Some(Err(TestError::Msg("handler"))));
        assert_eq!(recovered.peek(), Some(Ok(7)));
    }

    #[test]
    fn test_rejection_skips_then_and_reaches_catch() {
        let queue = MicrotaskQueue::new();
        let skipped = Arc::new(AtomicBool::new(true));
        let flag = skipped.clone();
        let result = Promise::<i32, TestError>::rejected(queue.clone(), TestError::Msg("x"))
            .then(move |v| {
                flag.store(false, Ordering::SeqCst);
                Ok(v)
            })
            .catch_error(|_| Ok::<_, TestError>(Resolution::Value(1)));
        queue.run_until_idle();
        assert!(skipped.load(Ordering::SeqCst));
        assert_eq!(result.peek(), Some(Ok(1)));
    }

    #[test]
    fn test_catch_error_adopts_recovery_promise() {
        let queue = MicrotaskQueue::new();
        let (fallback, fallback_resolver) = Promise::<i32, TestError>::deferred(queue.clone());
        let recovered = Promise::<i32, TestError>::rejected(queue.clone(), TestError::Msg("down"))
            .catch_error(move |_| Ok(Resolution::Promise(fallback)));
        queue.run_until_idle();
        assert!(recovered.is_pending());
        fallback_resolver.resolve(11);
        queue.run_until_idle();
        assert_eq!(recovered.peek(), Some(Ok(11)));
    }

    #[test]
    fn test_catch_error_passes_values_through() {
        let queue = MicrotaskQueue::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let result = Promise::<i32, TestError>::resolved(queue.clone(), 5).catch_error(move |e| {
            flag.store(true, Ordering::SeqCst);
            Err(e)
        });
        queue.run_until_idle();
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(result.peek(), Some(Ok(5)));
    }

    #[test]
    fn test_chain_adopts_returned_promise() {
        let queue = MicrotaskQueue::new();
        let (inner, inner_resolver) = Promise::<i32, TestError>::deferred(queue.clone());
        let returned = inner.clone();
        let outer = Promise::<i32, TestError>::resolved(queue.clone(), 0).chain(
            move |_| Ok(Resolution::Promise(returned)),
            |e| Err(e),
        );
        queue.run_until_idle();
        assert!(outer.is_pending());
        inner_resolver.resolve(5);
        queue.run_until_idle();
        assert_eq!(outer.peek(), Some(Ok(5)));
    }

    #[test]
    fn test_chain_returning_its_own_promise_is_a_cycle() {
        let queue = MicrotaskQueue::new();
        let slot: Arc<Mutex<Option<Promise<i32, TestError>>>> = Arc::new(Mutex::new(None));
        let captured = slot.clone();
        let next = Promise::<i32, TestError>::resolved(queue.clone(), 1).chain(
            move |_| {
                let me = captured.lock().unwrap().take().expect("set before run");
                Ok(Resolution::Promise(me))
            },
            |e| Err(e),
        );
        *slot.lock().unwrap() = Some(next.clone());
        queue.run_until_idle();
        assert_eq!(next.peek(), Some(Err(TestError::Cycle)));
    }

    #[test]
    fn test_adopting_self_rejects_with_cycle() {
        let queue = MicrotaskQueue::new();
        let (promise, resolver) = Promise::<i32, TestError>::deferred(queue.clone());
        resolver.adopt(promise.clone());
        queue.run_until_idle();
        assert_eq!(promise.peek(), Some(Err(TestError::Cycle)));
    }

    #[test]
    fn test_adopt_locks_out_later_calls() {
        let queue = MicrotaskQueue::new();
        let (source, source_resolver) = Promise::<i32, TestError>::deferred(queue.clone());
        let (target, resolver) = Promise::<i32, TestError>::deferred(queue.clone());
        resolver.adopt(source);
        resolver.resolve(99);
        queue.run_until_idle();
        assert!(target.is_pending());
        source_resolver.resolve(5);
        queue.run_until_idle();
        assert_eq!(target.peek(), Some(Ok(5)));
    }

    #[test]
    fn test_and_then_follows_inner_promise() {
        let queue = MicrotaskQueue::new();
        let scheduler: SchedulerRef = queue.clone();
        let result = Promise::<i32, TestError>::resolved(queue.clone(), 2)
            .and_then(move |v| Promise::resolved(scheduler, v * 10));
        queue.run_until_idle();
        assert_eq!(result.peek(), Some(Ok(20)));
    }

    #[test]
    fn test_finally_forwards_original_outcome() {
        let queue = MicrotaskQueue::new();
        let calls = Arc::new(Mutex::new(0));
        let (c1, c2) = (calls.clone(), calls.clone());
        let ok = Promise::<i32, String>::resolved(queue.clone(), 4).finally(move || {
            *c1.lock().unwrap() += 1;
            Ok(())
        });
        let err = Promise::<i32, String>::rejected(queue.clone(), "kept".into()).finally(move || {
            *c2.lock().unwrap() += 1;
            Ok(())
        });
        queue.run_until_idle();
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(ok.peek(), Some(Ok(4)));
        assert_eq!(err.peek(), Some(Err("kept".to_string())));
    }

    #[test]
    fn test_failing_finalizer_rejects() {
        let queue = MicrotaskQueue::new();
        let result = Promise::<i32, String>::resolved(queue.clone(), 4)
            .finally(|| Err("cleanup failed".into()));
        queue.run_until_idle();
        assert_eq!(result.peek(), Some(Err("cleanup failed".to_string())));
    }

    #[test]
    fn test_immediate_scheduler_propagates_synchronously() {
        let promise = Promise::<i32, String>::resolved(Immediate::new(), 1)
            .then(|v| Ok(v + 1))
            .then(|v| Ok(v * 3));
        assert_eq!(promise.peek(), Some(Ok(6)));
    }

    #[test]
    fn test_clones_share_state() {
        let queue = MicrotaskQueue::new();
        let (promise, resolver) = Promise::<i32, String>::deferred(queue);
        let other = promise.clone();
        assert!(other.ptr_eq(&promise));
        resolver.resolve(8);
        assert_eq!(other.peek(), Some(Ok(8)));
    }
}
