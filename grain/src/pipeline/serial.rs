use crate::deferred::{Deferred, Outcome, outcome};
use crate::environment::{Environment, ExecutorEnvironment};
use crate::executor::Inline;
use crate::stage::{Stage, deferred};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// What a [`Serial`] does after an inner stage fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failure; stages after it never run.
    FailFast,
    /// Run every stage; each failure stays inside its own outcome.
    #[default]
    CollectAll,
}

/// Sequential composition of same-typed stages.
///
/// Each step drives one inner stage to completion under `env`, so inner
/// stages run strictly in input order and outcomes accumulate in that order.
pub enum Serial<S: Stage> {
    Start {
        stages: Vec<S>,
        env: Arc<dyn Environment<S>>,
        policy: FailurePolicy,
    },
    Running {
        remaining: VecDeque<S>,
        current: S,
        outcomes: Vec<Outcome<S::Output>>,
        env: Arc<dyn Environment<S>>,
        policy: FailurePolicy,
    },
    Completed(Vec<Outcome<S::Output>>),
}

impl<S: Stage> Serial<S> {
    pub fn new(stages: Vec<S>, env: Arc<dyn Environment<S>>, policy: FailurePolicy) -> Self {
        Serial::Start {
            stages,
            env,
            policy,
        }
    }

    fn proceed(
        mut remaining: VecDeque<S>,
        outcomes: Vec<Outcome<S::Output>>,
        env: Arc<dyn Environment<S>>,
        policy: FailurePolicy,
    ) -> Self {
        match remaining.pop_front() {
            Some(current) => Serial::Running {
                remaining,
                current,
                outcomes,
                env,
                policy,
            },
            None => Serial::Completed(outcomes),
        }
    }
}

impl<S: Stage> Stage for Serial<S> {
    type Output = Vec<Outcome<S::Output>>;

    fn advance(self) -> Option<Deferred<Self>> {
        match self {
            Serial::Start {
                stages,
                env,
                policy,
            } => {
                let outcomes = Vec::with_capacity(stages.len());
                Some(Deferred::value(Serial::proceed(
                    stages.into(),
                    outcomes,
                    env,
                    policy,
                )))
            }
            Serial::Running {
                remaining,
                current,
                mut outcomes,
                env,
                policy,
            } => Some(Deferred::future(move |resolver| {
                deferred(current, Arc::clone(&env)).perform(move |produced| {
                    let next = match policy {
                        FailurePolicy::CollectAll => {
                            outcomes.push(produced);
                            Serial::proceed(remaining, outcomes, env, policy)
                        }
                        FailurePolicy::FailFast => match produced() {
                            Ok(value) => {
                                outcomes.push(outcome(Ok(value)));
                                Serial::proceed(remaining, outcomes, env, policy)
                            }
                            Err(error) => {
                                tracing::debug!(
                                    position = outcomes.len(),
                                    skipped = remaining.len(),
                                    error = %error,
                                    "Serial stage failed, skipping the rest"
                                );
                                outcomes.push(outcome(Err(error)));
                                Serial::Completed(outcomes)
                            }
                        },
                    };
                    resolver.succeed(next);
                });
            })),
            Serial::Completed(_) => None,
        }
    }

    fn into_result(self) -> Result<Self::Output, Self> {
        match self {
            Serial::Completed(outcomes) => Ok(outcomes),
            other => Err(other),
        }
    }
}

/// Run `stages` one after another and deliver their ordered outcomes.
///
/// The bookkeeping steps of the sequence run on [`Inline`]; every inner step
/// runs wherever `env` places it. Inline steps are trampolined, so the stack
/// depth does not grow with the number of stages.
pub fn serially<S: Stage>(
    stages: Vec<S>,
    env: Arc<dyn Environment<S>>,
    policy: FailurePolicy,
) -> Deferred<Vec<Outcome<S::Output>>> {
    let outer = Arc::new(ExecutorEnvironment::new(Arc::new(Inline)));
    deferred(Serial::new(stages, env, policy), outer)
}
