//! Executors backed by real thread pools.

use super::{Executor, Job};
use crate::errors::{GrainError, GrainResult};
use crate::options::ThreadPoolOptions;
use std::sync::Arc;

/// Work-stealing thread pool executor (rayon).
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct ThreadPool {
    pool: Arc<rayon::ThreadPool>,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl ThreadPool {
    pub fn new(options: &ThreadPoolOptions) -> GrainResult<Self> {
        options.sanitize()?;

        let prefix = options.thread_name_prefix.clone();
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(move |index| format!("{prefix}-{index}"))
            // Unwinding drops the job's resolver, which reports the step as abandoned.
            .panic_handler(|_| tracing::error!("Job panicked on thread pool"));
        if let Some(threads) = options.num_threads {
            builder = builder.num_threads(threads);
        }

        let pool = builder
            .build()
            .map_err(|e| GrainError::Internal(format!("Failed to build thread pool: {}", e)))?;

        tracing::debug!(
            threads = pool.current_num_threads(),
            prefix = %options.thread_name_prefix,
            "Built thread pool executor"
        );

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Executor for ThreadPool {
    fn dispatch(&self, job: Job) {
        self.pool.spawn(job);
    }
}

/// Executor spawning each job as a task on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Executor for the runtime the caller is running inside.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }

    /// Like [`TokioExecutor::current`], without panicking outside a runtime.
    pub fn try_current() -> GrainResult<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| GrainError::Internal(format!("No tokio runtime available: {}", e)))
    }
}

impl Executor for TokioExecutor {
    fn dispatch(&self, job: Job) {
        self.handle.spawn(async move { job() });
    }
}
