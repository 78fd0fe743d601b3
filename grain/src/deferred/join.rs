//! Join points for concurrent composition.
//!
//! Each side materializes its own outcome when it arrives and records it in a
//! mutex-guarded slot. Whichever side arrives last takes the resolver and
//! performs the combination, so the join is a single atomic update no matter
//! which executors the sides resolved on.

use super::{Deferred, Resolver};
use crate::errors::{GrainError, GrainResult};
use crate::executor::Executor;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

struct PairState<A: Send + 'static, B: Send + 'static> {
    left: Option<GrainResult<A>>,
    right: Option<GrainResult<B>>,
    first: Option<Side>,
    resolver: Option<Resolver<(A, B)>>,
}

type ReadyPair<A, B> = (GrainResult<A>, GrainResult<B>, Side, Resolver<(A, B)>);

impl<A: Send + 'static, B: Send + 'static> PairState<A, B> {
    fn record_first(&mut self, side: Side) {
        if self.first.is_none() {
            self.first = Some(side);
        }
    }

    /// Take everything needed to finish once both slots are filled.
    fn take_ready(&mut self) -> Option<ReadyPair<A, B>> {
        if self.left.is_none() || self.right.is_none() {
            return None;
        }
        let resolver = self.resolver.take()?;
        let first = self.first.unwrap_or(Side::Left);
        Some((self.left.take()?, self.right.take()?, first, resolver))
    }
}

fn finish<A, B>(left: GrainResult<A>, right: GrainResult<B>, first: Side) -> GrainResult<(A, B)> {
    match (left, right) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
        (Err(left), Err(right)) => {
            let (winner, loser) = match first {
                Side::Left => (left, right),
                Side::Right => (right, left),
            };
            tracing::debug!(
                winner = %winner,
                discarded = %loser,
                "Both sides of combine failed, keeping first arrival"
            );
            Err(winner)
        }
    }
}

pub(super) fn combine<A, B>(left: Deferred<A>, right: Deferred<B>) -> Deferred<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    Deferred::future(move |resolver| {
        let state = Arc::new(Mutex::new(PairState {
            left: None,
            right: None,
            first: None,
            resolver: Some(resolver),
        }));

        let left_state = Arc::clone(&state);
        left.perform(move |outcome| {
            let result = outcome();
            let ready = {
                let mut state = left_state.lock();
                state.record_first(Side::Left);
                state.left = Some(result);
                state.take_ready()
            };
            if let Some((a, b, first, resolver)) = ready {
                let combined = finish(a, b, first);
                resolver.resolve(Box::new(move || combined));
            }
        });

        right.perform(move |outcome| {
            let result = outcome();
            let ready = {
                let mut state = state.lock();
                state.record_first(Side::Right);
                state.right = Some(result);
                state.take_ready()
            };
            if let Some((a, b, first, resolver)) = ready {
                let combined = finish(a, b, first);
                resolver.resolve(Box::new(move || combined));
            }
        });
    })
}

struct ManyState<T: Send + 'static> {
    slots: Vec<Option<T>>,
    remaining: usize,
    resolver: Option<Resolver<Vec<T>>>,
}

pub(super) fn concurrently<T, F>(jobs: Vec<F>, executor: Arc<dyn Executor>) -> Deferred<Vec<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if jobs.is_empty() {
        return Deferred::value(Vec::new());
    }

    Deferred::future(move |resolver| {
        let count = jobs.len();
        let state = Arc::new(Mutex::new(ManyState {
            slots: (0..count).map(|_| None).collect(),
            remaining: count,
            resolver: Some(resolver),
        }));

        for (index, job) in jobs.into_iter().enumerate() {
            let state = Arc::clone(&state);
            executor.dispatch(Box::new(move || {
                let value = job();
                let ready = {
                    let mut state = state.lock();
                    state.slots[index] = Some(value);
                    state.remaining -= 1;
                    if state.remaining == 0 {
                        state
                            .resolver
                            .take()
                            .map(|resolver| (resolver, std::mem::take(&mut state.slots)))
                    } else {
                        None
                    }
                };
                if let Some((resolver, slots)) = ready {
                    let values: Option<Vec<T>> = slots.into_iter().collect();
                    match values {
                        Some(values) => resolver.succeed(values),
                        None => resolver.fail(GrainError::Internal(
                            "concurrent job slot left empty".into(),
                        )),
                    }
                }
            }));
        }
    })
}
