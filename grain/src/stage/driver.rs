//! Stage execution driver.
//!
//! One step, scheduled on the executor the environment picks for the current
//! variant:
//!
//! ```text
//! should_stop? ──yes──→ complete(Err(halt))
//!      │no
//! before(stage)
//! stage = adjust(stage)
//! terminal? ──yes──→ complete(Ok(output))
//!      │no
//! stage.next().perform(ok ─→ next step | err ─→ complete(Err))
//! ```
//!
//! Each step returns to its executor; no thread blocks and no call stack is
//! kept across a suspension point. Cancellation is only observed between steps.

use super::Stage;
use crate::deferred::{Deferred, Outcome, Resolver};
use crate::environment::Environment;
use crate::errors::GrainError;
use crate::executor::Executor;
use std::any::type_name;
use std::sync::Arc;

/// Final delivery of an execution, optionally hopping to a completion executor.
struct Finisher<T: Send + 'static> {
    completion_executor: Option<Arc<dyn Executor>>,
    resolver: Resolver<T>,
}

impl<T: Send + 'static> Finisher<T> {
    fn complete(self, outcome: Outcome<T>) {
        let Finisher {
            completion_executor,
            resolver,
        } = self;
        match completion_executor {
            Some(executor) => executor.dispatch(Box::new(move || resolver.resolve(outcome))),
            None => resolver.resolve(outcome),
        }
    }

    fn succeed(self, value: T) {
        self.complete(Box::new(move || Ok(value)));
    }

    fn fail(self, error: GrainError) {
        self.complete(Box::new(move || Err(error)));
    }
}

fn step<S, E>(stage: S, env: Arc<E>, halt: fn() -> GrainError, finisher: Finisher<S::Output>)
where
    S: Stage,
    E: Environment<S> + ?Sized,
{
    let executor = env.executor_for(&stage);
    executor.dispatch(Box::new(move || {
        if env.should_stop(&stage) {
            let error = halt();
            tracing::debug!(stage = type_name::<S>(), reason = %error, "Stage execution halted");
            finisher.fail(error);
            return;
        }

        env.before(&stage);
        let stage = env.adjust(stage);

        let stage = match stage.into_result() {
            Ok(output) => {
                tracing::trace!(stage = type_name::<S>(), "Stage reached terminal variant");
                finisher.succeed(output);
                return;
            }
            Err(stage) => stage,
        };

        tracing::trace!(stage = type_name::<S>(), "Advancing stage");
        stage.next().perform(move |outcome| match outcome() {
            Ok(next) => step(next, env, halt, finisher),
            Err(error) => {
                tracing::debug!(stage = type_name::<S>(), error = %error, "Stage step failed");
                finisher.fail(error);
            }
        });
    }));
}

/// Drive `stage` to completion under `env`, delivering the outcome to `completion`.
///
/// When `completion_executor` is given, the final delivery is dispatched there;
/// otherwise it runs on whichever executor finished the last step.
pub fn execute<S, E>(
    stage: S,
    env: Arc<E>,
    completion_executor: Option<Arc<dyn Executor>>,
    completion: impl FnOnce(Outcome<S::Output>) + Send + 'static,
) where
    S: Stage,
    E: Environment<S> + ?Sized,
{
    let finisher = Finisher {
        completion_executor,
        resolver: Resolver::new(completion),
    };
    step(stage, env, || GrainError::Stopped, finisher);
}

/// Deferred output of driving `stage` under `env`.
pub fn deferred<S, E>(stage: S, env: Arc<E>) -> Deferred<S::Output>
where
    S: Stage,
    E: Environment<S> + ?Sized,
{
    Deferred::future(move |resolver| {
        let finisher = Finisher {
            completion_executor: None,
            resolver,
        };
        step(stage, env, || GrainError::Stopped, finisher);
    })
}

/// Environment for the single-executor driver with a progress hook.
pub struct ProgressEnvironment<S: Stage> {
    executor: Arc<dyn Executor>,
    progress: Box<dyn Fn(&S) -> bool + Send + Sync>,
}

impl<S: Stage> ProgressEnvironment<S> {
    pub fn new(
        executor: Arc<dyn Executor>,
        progress: impl Fn(&S) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            executor,
            progress: Box::new(progress),
        }
    }
}

impl<S: Stage> Environment<S> for ProgressEnvironment<S> {
    fn executor_for(&self, _stage: &S) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }

    fn should_stop(&self, stage: &S) -> bool {
        !(self.progress)(stage)
    }
}

/// Drive every step on `executor`, asking `progress` before each one.
///
/// A `false` from `progress` fails the execution with [`GrainError::Cancelled`].
pub fn deferred_on<S: Stage>(
    stage: S,
    executor: Arc<dyn Executor>,
    progress: impl Fn(&S) -> bool + Send + Sync + 'static,
) -> Deferred<S::Output> {
    let env = Arc::new(ProgressEnvironment::new(executor, progress));
    Deferred::future(move |resolver| {
        let finisher = Finisher {
            completion_executor: None,
            resolver,
        };
        step(stage, env, || GrainError::Cancelled, finisher);
    })
}

/// Method-call forms of the driver entry points.
pub trait StageExt: Stage {
    fn run<E>(self, env: Arc<E>) -> Deferred<Self::Output>
    where
        E: Environment<Self> + ?Sized,
    {
        deferred(self, env)
    }

    fn run_on(self, executor: Arc<dyn Executor>) -> Deferred<Self::Output> {
        deferred_on(self, executor, |_| true)
    }

    fn run_with_progress(
        self,
        executor: Arc<dyn Executor>,
        progress: impl Fn(&Self) -> bool + Send + Sync + 'static,
    ) -> Deferred<Self::Output> {
        deferred_on(self, executor, progress)
    }
}

impl<S: Stage> StageExt for S {}
