//! Single-consumer FIFO queue with its own worker thread.

use super::{Executor, Job};
use crate::errors::GrainResult;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

struct QueueState {
    jobs: VecDeque<Job>,
    /// Nesting depth of `suspend` calls; jobs only run at zero.
    suspended: usize,
    closed: bool,
}

struct Shared {
    label: String,
    state: Mutex<QueueState>,
    ready: Condvar,
}

/// Owns the worker's lifetime: closing happens when the last handle drops.
struct Handle {
    shared: Arc<Shared>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        drop(state);
        self.shared.ready.notify_all();
    }
}

/// Serial executor: jobs run one at a time, in dispatch order, on one thread.
///
/// `suspend`/`resume` nest. While suspended, dispatched jobs queue up and the
/// job currently running (if any) is unaffected. The worker exits once every
/// handle is dropped and the queue has drained; jobs still parked in a
/// suspended queue at that point are dropped.
#[derive(Clone)]
pub struct SerialQueue {
    handle: Arc<Handle>,
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.handle.shared.label)
            .finish()
    }
}

impl SerialQueue {
    /// Spawn the worker thread for a new queue.
    pub fn new(label: impl Into<String>) -> GrainResult<Self> {
        let shared = Arc::new(Shared {
            label: label.into(),
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                suspended: 0,
                closed: false,
            }),
            ready: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        std::thread::Builder::new()
            .name(shared.label.clone())
            .spawn(move || run_worker(worker))?;

        tracing::trace!(label = %shared.label, "Spawned serial queue worker");

        Ok(Self {
            handle: Arc::new(Handle { shared }),
        })
    }

    pub fn label(&self) -> &str {
        &self.handle.shared.label
    }

    /// Stop running queued jobs until a matching [`SerialQueue::resume`].
    pub fn suspend(&self) {
        let mut state = self.handle.shared.state.lock();
        state.suspended += 1;
        tracing::debug!(label = %self.label(), depth = state.suspended, "Suspended serial queue");
    }

    pub fn resume(&self) {
        let mut state = self.handle.shared.state.lock();
        if state.suspended == 0 {
            tracing::warn!(label = %self.label(), "resume called on a queue that is not suspended");
            return;
        }
        state.suspended -= 1;
        tracing::debug!(label = %self.label(), depth = state.suspended, "Resumed serial queue");
        let runnable = state.suspended == 0;
        drop(state);
        if runnable {
            self.handle.shared.ready.notify_all();
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.handle.shared.state.lock().suspended > 0
    }

    /// Number of jobs waiting to run.
    pub fn queued(&self) -> usize {
        self.handle.shared.state.lock().jobs.len()
    }
}

impl Executor for SerialQueue {
    fn dispatch(&self, job: Job) {
        let shared = &self.handle.shared;
        shared.state.lock().jobs.push_back(job);
        shared.ready.notify_one();
    }
}

fn next_job(shared: &Shared) -> Option<Job> {
    let mut state = shared.state.lock();
    loop {
        if state.suspended == 0
            && let Some(job) = state.jobs.pop_front()
        {
            return Some(job);
        }
        if state.closed && (state.jobs.is_empty() || state.suspended > 0) {
            if !state.jobs.is_empty() {
                tracing::debug!(
                    label = %shared.label,
                    dropped = state.jobs.len(),
                    "Serial queue closed while suspended, dropping queued jobs"
                );
                state.jobs.clear();
            }
            return None;
        }
        shared.ready.wait(&mut state);
    }
}

fn run_worker(shared: Arc<Shared>) {
    while let Some(job) = next_job(&shared) {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(label = %shared.label, "Job panicked on serial queue");
        }
    }
    tracing::trace!(label = %shared.label, "Serial queue worker exiting");
}
