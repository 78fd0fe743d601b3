//! Deferred values: computable now, or once a continuation has been registered.
//!
//! ## Model
//!
//! ```text
//! Deferred<T>
//!   ├── Unit(outcome)        outcome available synchronously
//!   └── Future(registrar)    registrar receives a Resolver<T> and resolves it later
//! ```
//!
//! Results travel as [`Outcome`] producers. A failure stays inert until the
//! producer is invoked; storing an outcome without calling it silently drops
//! the error.
//!
//! `perform` hands the continuation its outcome exactly once. A [`Resolver`]
//! that is dropped unresolved delivers [`GrainError::Abandoned`] instead of
//! leaving the continuation hanging.

mod bridge;
mod join;

pub use bridge::DeferredFuture;

use crate::errors::{GrainError, GrainResult};
use crate::executor::Executor;
use std::fmt;
use std::sync::Arc;

/// Zero-argument producer yielding the success value or the captured failure.
pub type Outcome<T> = Box<dyn FnOnce() -> GrainResult<T> + Send>;

/// Registration function of a pending [`Deferred`].
pub type Registrar<T> = Box<dyn FnOnce(Resolver<T>) + Send>;

/// Wrap a plain result as an [`Outcome`].
pub fn outcome<T: Send + 'static>(result: GrainResult<T>) -> Outcome<T> {
    Box::new(move || result)
}

/// One-shot continuation handed to a registrar.
pub struct Resolver<T: Send + 'static> {
    continuation: Option<Box<dyn FnOnce(Outcome<T>) + Send>>,
}

impl<T: Send + 'static> Resolver<T> {
    pub fn new<F>(continuation: F) -> Self
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        Self {
            continuation: Some(Box::new(continuation)),
        }
    }

    /// Deliver the outcome to the continuation.
    pub fn resolve(mut self, outcome: Outcome<T>) {
        if let Some(continuation) = self.continuation.take() {
            continuation(outcome);
        }
    }

    pub fn succeed(self, value: T) {
        self.resolve(Box::new(move || Ok(value)));
    }

    pub fn fail(self, error: GrainError) {
        self.resolve(Box::new(move || Err(error)));
    }
}

impl<T: Send + 'static> Drop for Resolver<T> {
    fn drop(&mut self) {
        if let Some(continuation) = self.continuation.take() {
            tracing::warn!(
                value_type = std::any::type_name::<T>(),
                "Resolver dropped without resolving, delivering abandonment"
            );
            continuation(Box::new(|| Err(GrainError::Abandoned)));
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("resolved", &self.continuation.is_none())
            .finish()
    }
}

/// A value that is either already computable or will be once registered.
pub enum Deferred<T: Send + 'static> {
    Unit(Outcome<T>),
    Future(Registrar<T>),
}

impl<T: Send + 'static> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferred::Unit(_) => f.write_str("Deferred::Unit"),
            Deferred::Future(_) => f.write_str("Deferred::Future"),
        }
    }
}

impl<T: Send + 'static> Deferred<T> {
    /// Wrap an already available, possibly failing, producer.
    pub fn unit<F>(producer: F) -> Self
    where
        F: FnOnce() -> GrainResult<T> + Send + 'static,
    {
        Deferred::Unit(Box::new(producer))
    }

    pub fn value(value: T) -> Self {
        Deferred::Unit(Box::new(move || Ok(value)))
    }

    pub fn failed(error: GrainError) -> Self {
        Deferred::Unit(Box::new(move || Err(error)))
    }

    /// Wrap a value obtainable later through `registrar`.
    pub fn future<F>(registrar: F) -> Self
    where
        F: FnOnce(Resolver<T>) + Send + 'static,
    {
        Deferred::Future(Box::new(registrar))
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Deferred::Unit(_))
    }

    /// Trigger computation or registration; `continuation` runs exactly once.
    pub fn perform<F>(self, continuation: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        match self {
            Deferred::Unit(outcome) => continuation(outcome),
            Deferred::Future(registrar) => registrar(Resolver::new(continuation)),
        }
    }

    /// Transform the eventual success value; failures pass through untouched.
    pub fn map<U, F>(self, transform: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(transform(value)))
    }

    /// Like [`Deferred::map`], with a transform that may itself fail.
    pub fn try_map<U, F>(self, transform: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> GrainResult<U> + Send + 'static,
    {
        match self {
            Deferred::Unit(outcome) => Deferred::Unit(Box::new(move || outcome().and_then(transform))),
            Deferred::Future(registrar) => Deferred::future(move |resolver| {
                registrar(Resolver::new(move |outcome: Outcome<T>| {
                    resolver.resolve(Box::new(move || outcome().and_then(transform)));
                }))
            }),
        }
    }

    /// Chain a dependent deferred built from the lazy outcome.
    ///
    /// An error returned by `transform` becomes an already-failed deferred,
    /// so call sites never handle it themselves.
    pub fn flat_map<U, F>(self, transform: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(Outcome<T>) -> GrainResult<Deferred<U>> + Send + 'static,
    {
        match self {
            Deferred::Unit(outcome) => transform(outcome).unwrap_or_else(Deferred::failed),
            Deferred::Future(registrar) => Deferred::future(move |resolver| {
                registrar(Resolver::new(move |outcome| match transform(outcome) {
                    Ok(next) => next.perform(move |outcome| resolver.resolve(outcome)),
                    Err(e) => resolver.fail(e),
                }))
            }),
        }
    }

    /// Chain on the success value only.
    pub fn and_then<U, F>(self, transform: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Deferred<U> + Send + 'static,
    {
        self.flat_map(move |outcome| Ok(transform(outcome()?)))
    }

    /// Discard the success value, keeping any failure.
    pub fn ignoring_result(self) -> Deferred<()> {
        self.map(|_| ())
    }

    /// Perform `cleanup` after this value is produced, on success and failure
    /// alike, before the final continuation runs.
    ///
    /// This is also the "run a task before delivering the result" hook; the
    /// cleanup's value is discarded.
    ///
    /// A failing cleanup never replaces the primary outcome; it is logged.
    pub fn with_cleanup<M>(self, cleanup: Deferred<M>) -> Deferred<T>
    where
        M: Send + 'static,
    {
        Deferred::future(move |resolver| {
            self.perform(move |primary| {
                cleanup.perform(move |cleaned| {
                    if let Err(e) = cleaned() {
                        tracing::warn!(error = %e, "Cleanup task failed");
                    }
                    resolver.resolve(primary);
                });
            });
        })
    }

    /// Reschedule delivery of the eventual outcome onto `executor`.
    pub fn on(self, executor: Arc<dyn Executor>) -> Deferred<T> {
        Deferred::future(move |resolver| {
            self.perform(move |outcome| {
                executor.dispatch(Box::new(move || resolver.resolve(outcome)));
            });
        })
    }

    /// Parallel AND: run both sides independently and yield `(self, other)`.
    ///
    /// The tuple order is fixed regardless of completion order. If both sides
    /// fail, the side whose outcome arrived first wins; the other error is logged.
    pub fn combine<U>(self, other: Deferred<U>) -> Deferred<(T, U)>
    where
        U: Send + 'static,
    {
        join::combine(self, other)
    }

    /// Run independent producers on `executor`, collecting their values in input order.
    pub fn concurrently<F>(jobs: Vec<F>, executor: Arc<dyn Executor>) -> Deferred<Vec<T>>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        join::concurrently(jobs, executor)
    }
}

impl<T: Send + 'static> From<GrainResult<T>> for Deferred<T> {
    fn from(result: GrainResult<T>) -> Self {
        Deferred::Unit(outcome(result))
    }
}
