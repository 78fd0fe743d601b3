//! Error types shared by every grain component.

use thiserror::Error;

/// Failure value carried inside an outcome producer.
///
/// Stage implementations raise their own domain errors through
/// [`GrainError::Stage`]; the remaining variants are produced by the runtime.
#[derive(Debug, Error)]
pub enum GrainError {
    /// `advance` was called on a stage that had already reached a terminal variant.
    #[error("advance called on completed stage {0}")]
    StageMisuse(String),

    /// The environment's stop predicate refused the next step.
    #[error("stage execution stopped by environment")]
    Stopped,

    /// A progress hook declined to continue.
    #[error("stage execution cancelled by progress hook")]
    Cancelled,

    /// A resolver was dropped before it produced a result.
    #[error("deferred value abandoned before resolution")]
    Abandoned,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Domain error raised by a stage implementation.
    #[error(transparent)]
    Stage(#[from] anyhow::Error),
}

impl GrainError {
    /// Build a [`GrainError::StageMisuse`] naming the offending stage type.
    pub fn misuse<S>() -> Self {
        GrainError::StageMisuse(std::any::type_name::<S>().to_string())
    }

    /// Whether this error came from cooperative cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, GrainError::Stopped | GrainError::Cancelled)
    }
}

pub type GrainResult<T> = Result<T, GrainError>;
