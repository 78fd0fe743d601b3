//! Stages: resumable units of work expressed as a closed set of variants.
//!
//! ## Shape of a stage
//!
//! ```text
//! enum Upload {
//!     Open { path }          ─ advance ─→  Deferred<Upload::Send { body }>
//!     Send { body }          ─ advance ─→  Deferred<Upload::Done(response)>
//!     Done(response)         terminal, into_result() yields the response
//! }
//! ```
//!
//! The execution driver (see [`execute`]) repeatedly asks the environment for
//! an executor, checks the stop predicate, runs the hooks and either finishes
//! with the terminal output or advances to the next variant.

mod driver;

pub use driver::{ProgressEnvironment, StageExt, deferred, deferred_on, execute};

use crate::deferred::Deferred;
use crate::errors::GrainError;

/// A self-transforming unit of work.
pub trait Stage: Sized + Send + 'static {
    type Output: Send + 'static;

    /// Produce the next variant.
    ///
    /// Returns `None` when the stage is already terminal. The driver never
    /// calls `advance` on a terminal stage.
    fn advance(self) -> Option<Deferred<Self>>;

    /// Terminal output, or the stage handed back when it has further steps.
    fn into_result(self) -> Result<Self::Output, Self>;

    /// [`Stage::advance`] with the terminal case reported as
    /// [`GrainError::StageMisuse`].
    fn next(self) -> Deferred<Self> {
        self.advance()
            .unwrap_or_else(|| Deferred::failed(GrainError::misuse::<Self>()))
    }
}

/// Embed a child stage inside one of the parent's variants.
///
/// A terminal child continues with `on_result(output)`. Otherwise the child
/// advances one step and the new child is wrapped back with `on_next`.
pub fn compose<C, P, N, R>(child: C, on_next: N, on_result: R) -> Deferred<P>
where
    C: Stage,
    P: Send + 'static,
    N: FnOnce(C) -> P + Send + 'static,
    R: FnOnce(C::Output) -> Deferred<P>,
{
    match child.into_result() {
        Ok(output) => on_result(output),
        Err(child) => child.next().map(on_next),
    }
}
