//! Process-wide tracing setup.

use crate::errors::GrainResult;
use crate::options::LoggingOptions;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable overriding [`LoggingOptions::filter`].
pub const LOG_ENV: &str = "GRAIN_LOG";

/// Keeps the non-blocking file writer flushing for the life of the process.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn env_filter(options: &LoggingOptions) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&options.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Writes to stderr, or to `<log_dir>/grain.log.<date>` when `log_dir` is set.
/// Calling this again after a subscriber is installed is a no-op.
pub fn init_logging(options: &LoggingOptions) -> GrainResult<()> {
    let filter = env_filter(options);

    let installed = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "grain.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let installed = tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .try_init()
                .is_ok();
            if installed {
                let _ = LOG_GUARD.set(guard);
            }
            installed
        }
        None => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(options.ansi)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::debug!(
            filter = %options.filter,
            log_dir = ?options.log_dir,
            "Logging initialized"
        );
    }

    Ok(())
}
