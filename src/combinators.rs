//! Aggregating many inputs into one promise.
//!
//! Every combinator materializes its inputs first; results are reported in
//! input order no matter in which order the inputs settle. Inputs can be plain
//! values, promises or thenables (anything `Into<Resolution>`).
//!
//! | combinator             | fulfills with                 | rejects with                 |
//! |------------------------|-------------------------------|------------------------------|
//! | [`join_all`]           | every value, once all succeed | the first failure            |
//! | [`join_all_settled`]   | every outcome, once all settle| never                        |
//! | [`race_first_success`] | the first value               | all failures, once all fail  |
//! | [`race_first_settled`] | the first value               | the first failure            |
use std::sync::{Arc, Mutex, PoisonError};

use crate::promise::{Promise, Resolver};
use crate::resolution::Resolution;
use crate::scheduler::SchedulerRef;
use crate::state::PromiseState;
use crate::AggregateError;

/// The outcome of one input of [`join_all_settled`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Settled<T, E> {
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> Settled<T, E> {
    pub fn status(&self) -> PromiseState {
        match self {
            Settled::Fulfilled(_) => PromiseState::Fulfilled,
            Settled::Rejected(_) => PromiseState::Rejected,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Settled::Fulfilled(value) => Some(value),
            Settled::Rejected(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&E> {
        match self {
            Settled::Fulfilled(_) => None,
            Settled::Rejected(reason) => Some(reason),
        }
    }
}

impl<T, E> From<Result<T, E>> for Settled<T, E> {
    fn from(outcome: Result<T, E>) -> Self {
        match outcome {
            Ok(value) => Settled::Fulfilled(value),
            Err(reason) => Settled::Rejected(reason),
        }
    }
}

/// Per-call result buffer: one slot per input and a count of empty slots.
struct Slots<V> {
    values: Vec<Option<V>>,
    remaining: usize,
}

impl<V> Slots<V> {
    fn shared(len: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Slots {
            values: (0..len).map(|_| None).collect(),
            remaining: len,
        }))
    }

    /// Stores `value` at `index`. Returns the full buffer once the last slot
    /// is filled. A slot is only ever counted once.
    fn fill(&mut self, index: usize, value: V) -> Option<Vec<V>> {
        let Some(slot) = self.values.get_mut(index) else {
            return None;
        };
        if slot.is_some() {
            return None;
        }
        *slot = Some(value);
        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }
        Some(std::mem::take(&mut self.values).into_iter().flatten().collect())
    }
}

fn fill<V>(slots: &Mutex<Slots<V>>, index: usize, value: V) -> Option<Vec<V>> {
    slots
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .fill(index, value)
}

fn materialize<T, E, I, R>(inputs: I) -> Vec<Resolution<T, E>>
where
    I: IntoIterator<Item = R>,
    R: Into<Resolution<T, E>>,
{
    inputs.into_iter().map(Into::into).collect()
}

/// Fulfills with every value, in input order, once all inputs succeed.
/// Rejects with the first failure observed.
pub fn join_all<T, E, I, R>(scheduler: SchedulerRef, inputs: I) -> Promise<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = R>,
    R: Into<Resolution<T, E>>,
{
    let inputs = materialize(inputs);
    let (output, resolver) = Promise::deferred(scheduler.clone());
    if inputs.is_empty() {
        resolver.resolve(vec![]);
        return output;
    }

    let slots = Slots::shared(inputs.len());
    for (index, input) in inputs.into_iter().enumerate() {
        match input {
            Resolution::Value(value) => {
                if let Some(values) = fill(&slots, index, value) {
                    resolver.resolve(values);
                }
            }
            input => {
                let (slots, resolver) = (slots.clone(), resolver.clone());
                input
                    .into_promise(scheduler.clone())
                    .subscribe(move |outcome| match outcome {
                        Ok(value) => {
                            if let Some(values) = fill(&slots, index, value) {
                                log::debug!("join_all fulfilled with {} value(s)", values.len());
                                resolver.resolve(values);
                            }
                        }
                        Err(reason) => resolver.reject(reason),
                    });
            }
        }
    }
    output
}

/// Fulfills with the outcome of every input, in input order, once all of
/// them have settled. Never rejects.
pub fn join_all_settled<T, E, I, R>(
    scheduler: SchedulerRef,
    inputs: I,
) -> Promise<Vec<Settled<T, E>>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = R>,
    R: Into<Resolution<T, E>>,
{
    let inputs = materialize(inputs);
    let (output, resolver) = Promise::deferred(scheduler.clone());
    if inputs.is_empty() {
        resolver.resolve(vec![]);
        return output;
    }

    let slots = Slots::shared(inputs.len());
    for (index, input) in inputs.into_iter().enumerate() {
        match input {
            Resolution::Value(value) => {
                if let Some(outcomes) = fill(&slots, index, Settled::Fulfilled(value)) {
                    resolver.resolve(outcomes);
                }
            }
            input => {
                let (slots, resolver) = (slots.clone(), resolver.clone());
                input
                    .into_promise(scheduler.clone())
                    .subscribe(move |outcome| {
                        if let Some(outcomes) = fill(&slots, index, outcome.into()) {
                            log::debug!("join_all_settled done with {} input(s)", outcomes.len());
                            resolver.resolve(outcomes);
                        }
                    });
            }
        }
    }
    output
}

/// Fulfills with the first value to arrive. Rejects with every failure, in
/// input order, once all inputs have failed.
pub fn race_first_success<T, E, I, R>(
    scheduler: SchedulerRef,
    inputs: I,
) -> Promise<T, AggregateError<E>>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = R>,
    R: Into<Resolution<T, E>>,
{
    let inputs = materialize(inputs);
    let (output, resolver) = Promise::deferred(scheduler.clone());
    if inputs.is_empty() {
        resolver.reject(AggregateError { reasons: vec![] });
        return output;
    }

    let slots = Slots::shared(inputs.len());
    for (index, input) in inputs.into_iter().enumerate() {
        match input {
            Resolution::Value(value) => resolve_soon(&scheduler, &resolver, value),
            input => {
                let (slots, resolver) = (slots.clone(), resolver.clone());
                input
                    .into_promise(scheduler.clone())
                    .subscribe(move |outcome| match outcome {
                        Ok(value) => resolver.resolve(value),
                        Err(reason) => {
                            if let Some(reasons) = fill(&slots, index, reason) {
                                log::debug!(
                                    "race_first_success: all {} input(s) failed",
                                    reasons.len()
                                );
                                resolver.reject(AggregateError { reasons });
                            }
                        }
                    });
            }
        }
    }
    output
}

/// Settles like whichever input settles first. Stays pending forever when
/// there are no inputs.
pub fn race_first_settled<T, E, I, R>(scheduler: SchedulerRef, inputs: I) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = R>,
    R: Into<Resolution<T, E>>,
{
    let inputs = materialize(inputs);
    let (output, resolver) = Promise::deferred(scheduler.clone());
    if inputs.is_empty() {
        log::debug!("race_first_settled over no inputs never settles");
    }

    for input in inputs {
        match input {
            Resolution::Value(value) => resolve_soon(&scheduler, &resolver, value),
            input => {
                let resolver = resolver.clone();
                input
                    .into_promise(scheduler.clone())
                    .subscribe(move |outcome| match outcome {
                        Ok(value) => resolver.resolve(value),
                        Err(reason) => resolver.reject(reason),
                    });
            }
        }
    }
    output
}

/// Delivers a plain input the way an already fulfilled promise would: on
/// the scheduler, in input order.
fn resolve_soon<T, E>(scheduler: &SchedulerRef, resolver: &Resolver<T, E>, value: T)
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let resolver = resolver.clone();
    scheduler.schedule(Box::new(move || resolver.resolve(value)));
}
