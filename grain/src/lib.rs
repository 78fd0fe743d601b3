//! Grain: deferred values, resumable stages and bounded-concurrency scheduling.
//!
//! Work is written as [`Stage`] state machines whose steps return
//! [`Deferred`] values. The driver in [`stage`] walks a stage from variant to
//! variant on whatever [`Executor`] its [`Environment`] picks, without
//! blocking a thread across asynchronous steps.
//!
//! - [`deferred`]: lazily failing values and callback-registered futures
//! - [`executor`]: inline, serial queue, rayon and tokio executors
//! - [`environment`]: per-step executor choice, stop predicate and hooks
//! - [`stage`]: the stage contract and the execution driver
//! - [`pipeline`]: `ProductionLine` and `Serial`
//!
//! ```ignore
//! let env: Arc<dyn Environment<Fetch>> = Arc::new(ExecutorEnvironment::new(pool));
//! let page = Fetch::new(url).run(Arc::clone(&env)).await?;
//! ```

pub mod deferred;
pub mod environment;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod options;
pub mod pipeline;
pub mod stage;

#[cfg(test)]
mod test_support;

pub use deferred::{Deferred, Outcome, Resolver};
pub use environment::{Environment, ExecutorEnvironment, PolicyEnvironment, Recording};
pub use errors::{GrainError, GrainResult};
pub use executor::{Executor, Inline, SerialQueue, ThreadPool, TokioExecutor};
pub use logging::init_logging;
pub use options::GrainOptions;
pub use pipeline::{FailurePolicy, LineMetrics, LineStatus, ProductionLine, Serial, serially};
pub use stage::{Stage, StageExt};
