//! Execution policy consulted by the driver at every step.

use crate::executor::Executor;
use crate::stage::Stage;
use parking_lot::Mutex;
use std::sync::Arc;

/// Per-step policy bundle.
///
/// Only [`Environment::executor_for`] is mandatory. The remaining hooks
/// default to "never stop", "do nothing" and "leave the stage as is".
pub trait Environment<S: Stage>: Send + Sync + 'static {
    /// Executor the next step of `stage` runs on.
    fn executor_for(&self, stage: &S) -> Arc<dyn Executor>;

    /// Refuse the next step; the execution fails with `GrainError::Stopped`.
    fn should_stop(&self, _stage: &S) -> bool {
        false
    }

    /// Side-effecting hook invoked before every step.
    fn before(&self, _stage: &S) {}

    /// Rewrite the stage before it is inspected and advanced.
    fn adjust(&self, stage: S) -> S {
        stage
    }
}

impl<S: Stage, E: Environment<S> + ?Sized> Environment<S> for Arc<E> {
    fn executor_for(&self, stage: &S) -> Arc<dyn Executor> {
        (**self).executor_for(stage)
    }

    fn should_stop(&self, stage: &S) -> bool {
        (**self).should_stop(stage)
    }

    fn before(&self, stage: &S) {
        (**self).before(stage)
    }

    fn adjust(&self, stage: S) -> S {
        (**self).adjust(stage)
    }
}

/// Runs every step on a single executor with default hooks.
#[derive(Clone)]
pub struct ExecutorEnvironment {
    executor: Arc<dyn Executor>,
}

impl ExecutorEnvironment {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

impl<S: Stage> Environment<S> for ExecutorEnvironment {
    fn executor_for(&self, _stage: &S) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }
}

type StopFn<S> = Box<dyn Fn(&S) -> bool + Send + Sync>;
type BeforeFn<S> = Box<dyn Fn(&S) + Send + Sync>;
type AdjustFn<S> = Box<dyn Fn(S) -> S + Send + Sync>;

/// Environment assembled from closures.
///
/// ```ignore
/// let env = PolicyEnvironment::new(Arc::new(Inline))
///     .with_stop(|stage: &Countdown| stage.remaining() == 1)
///     .with_before(|stage| tracing::info!(?stage, "step"));
/// ```
pub struct PolicyEnvironment<S: Stage> {
    executor: Arc<dyn Executor>,
    stop: Option<StopFn<S>>,
    before: Option<BeforeFn<S>>,
    adjust: Option<AdjustFn<S>>,
}

impl<S: Stage> PolicyEnvironment<S> {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            stop: None,
            before: None,
            adjust: None,
        }
    }

    pub fn with_stop(mut self, stop: impl Fn(&S) -> bool + Send + Sync + 'static) -> Self {
        self.stop = Some(Box::new(stop));
        self
    }

    pub fn with_before(mut self, before: impl Fn(&S) + Send + Sync + 'static) -> Self {
        self.before = Some(Box::new(before));
        self
    }

    pub fn with_adjust(mut self, adjust: impl Fn(S) -> S + Send + Sync + 'static) -> Self {
        self.adjust = Some(Box::new(adjust));
        self
    }
}

impl<S: Stage> Environment<S> for PolicyEnvironment<S> {
    fn executor_for(&self, _stage: &S) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }

    fn should_stop(&self, stage: &S) -> bool {
        self.stop.as_ref().is_some_and(|stop| stop(stage))
    }

    fn before(&self, stage: &S) {
        if let Some(before) = &self.before {
            before(stage);
        }
    }

    fn adjust(&self, stage: S) -> S {
        match &self.adjust {
            Some(adjust) => adjust(stage),
            None => stage,
        }
    }
}

/// Wraps an environment and records a label for every visited stage.
///
/// Labels are taken in `before`, after the stop predicate has let the step
/// through, so a stopped step is never recorded.
pub struct Recording<S: Stage, E> {
    inner: E,
    label: Box<dyn Fn(&S) -> String + Send + Sync>,
    visited: Mutex<Vec<String>>,
}

impl<S: Stage, E: Environment<S>> Recording<S, E> {
    pub fn new(inner: E, label: impl Fn(&S) -> String + Send + Sync + 'static) -> Self {
        Self {
            inner,
            label: Box::new(label),
            visited: Mutex::new(Vec::new()),
        }
    }

    /// Labels recorded so far, in visit order.
    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().clone()
    }
}

impl<S: Stage, E: Environment<S>> Environment<S> for Recording<S, E> {
    fn executor_for(&self, stage: &S) -> Arc<dyn Executor> {
        self.inner.executor_for(stage)
    }

    fn should_stop(&self, stage: &S) -> bool {
        self.inner.should_stop(stage)
    }

    fn before(&self, stage: &S) {
        self.visited.lock().push((self.label)(stage));
        self.inner.before(stage);
    }

    fn adjust(&self, stage: S) -> S {
        self.inner.adjust(stage)
    }
}
