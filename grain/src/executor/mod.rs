//! Executors: the injected capability to run a closure later or concurrently.
//!
//! The core owns no threads of its own. Every step of a stage, every join and
//! every production-line command is handed to an [`Executor`] chosen by the
//! caller:
//!
//! - [`Inline`]: run on the calling thread (deterministic tests)
//! - [`SerialQueue`]: one worker thread, FIFO, suspendable
//! - [`ThreadPool`]: rayon work-stealing pool
//! - [`TokioExecutor`]: tasks on a tokio runtime
//!
//! Any `Fn(Job) + Send + Sync` closure is an executor as well.

mod pool;
mod serial_queue;

pub use pool::{ThreadPool, TokioExecutor};
pub use serial_queue::SerialQueue;

use std::cell::RefCell;
use std::collections::VecDeque;

/// Unit of work scheduled on an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Schedules closures for later or concurrent execution.
pub trait Executor: Send + Sync + 'static {
    fn dispatch(&self, job: Job);
}

impl<F> Executor for F
where
    F: Fn(Job) + Send + Sync + 'static,
{
    fn dispatch(&self, job: Job) {
        self(job)
    }
}

thread_local! {
    /// Jobs dispatched inline while another inline job is running on this thread.
    static INLINE_BACKLOG: RefCell<Option<VecDeque<Job>>> = const { RefCell::new(None) };
}

/// Clears the backlog when the outermost inline dispatch ends, panics included.
struct BacklogGuard;

impl Drop for BacklogGuard {
    fn drop(&mut self) {
        let leftover = INLINE_BACKLOG.with(|backlog| backlog.borrow_mut().take());
        drop(leftover);
    }
}

/// Runs every job on the dispatching thread before `dispatch` returns.
///
/// A job dispatched from inside another inline job is queued and runs right
/// after the current one, so chains of synchronous steps run in constant
/// stack depth. A job must not block waiting on work it dispatched inline.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Executor for Inline {
    fn dispatch(&self, job: Job) {
        let job = INLINE_BACKLOG.with(move |backlog| match backlog.borrow_mut().as_mut() {
            Some(queued) => {
                queued.push_back(job);
                None
            }
            None => Some(job),
        });
        let Some(job) = job else {
            return;
        };

        INLINE_BACKLOG.with(|backlog| *backlog.borrow_mut() = Some(VecDeque::new()));
        let _guard = BacklogGuard;
        job();
        while let Some(next) = INLINE_BACKLOG
            .with(|backlog| backlog.borrow_mut().as_mut().and_then(VecDeque::pop_front))
        {
            next();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_inline_runs_synchronously() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        Inline.dispatch(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_inline_jobs_run_after_current_job() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let outer = Arc::clone(&order);
        Inline.dispatch(Box::new(move || {
            let inner = Arc::clone(&outer);
            Inline.dispatch(Box::new(move || inner.lock().push("nested")));
            outer.lock().push("outer");
        }));
        assert_eq!(*order.lock(), vec!["outer", "nested"]);
    }

    #[test]
    fn test_deep_inline_chain_does_not_grow_stack() {
        fn hop(remaining: usize, hits: Arc<AtomicUsize>) {
            hits.fetch_add(1, Ordering::SeqCst);
            if remaining > 0 {
                Inline.dispatch(Box::new(move || hop(remaining - 1, hits)));
            }
        }

        let hits = Arc::new(AtomicUsize::new(0));
        hop(500_000, Arc::clone(&hits));
        assert_eq!(hits.load(Ordering::SeqCst), 500_001);
    }

    #[test]
    fn test_closure_is_executor() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dispatched);
        let executor = move |job: Job| {
            counter.fetch_add(1, Ordering::SeqCst);
            job();
        };

        let executor: Arc<dyn Executor> = Arc::new(executor);
        executor.dispatch(Box::new(|| {}));
        executor.dispatch(Box::new(|| {}));
        assert_eq!(dispatched.load(Ordering::SeqCst), 2);
    }
}
