//! Configuration for executors, production lines and logging.
//!
//! All sections deserialize with defaults, so a partial JSON document such as
//! `{"production_line": {"max_active": 8}}` is valid. Call
//! [`GrainOptions::sanitize`] before use.

use crate::errors::{GrainError, GrainResult};
use crate::pipeline::FailurePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrainOptions {
    pub production_line: ProductionLineOptions,
    pub thread_pool: ThreadPoolOptions,
    pub serial: SerialOptions,
    pub logging: LoggingOptions,
}

impl GrainOptions {
    pub fn from_json_str(json: &str) -> GrainResult<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| GrainError::Config(format!("Failed to parse options: {}", e)))?;
        options.sanitize()?;
        Ok(options)
    }

    pub fn from_json_file(path: &Path) -> GrainResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            GrainError::Config(format!(
                "Failed to read options file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&json)
    }

    /// Validate every section.
    pub fn sanitize(&self) -> GrainResult<()> {
        self.production_line.sanitize()?;
        self.thread_pool.sanitize()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionLineOptions {
    /// Upper bound on concurrently active stages. Must be greater than zero.
    pub max_active: usize,
    /// Name of the line's serialization thread.
    pub label: String,
}

impl Default for ProductionLineOptions {
    fn default() -> Self {
        Self {
            max_active: 4,
            label: "grain-line".to_string(),
        }
    }
}

impl ProductionLineOptions {
    pub fn sanitize(&self) -> GrainResult<()> {
        if self.max_active == 0 {
            return Err(GrainError::Config(
                "production_line.max_active must be greater than zero".into(),
            ));
        }
        if self.label.is_empty() {
            return Err(GrainError::Config("production_line.label must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolOptions {
    /// Worker count; `None` lets rayon pick one per core.
    pub num_threads: Option<usize>,
    pub thread_name_prefix: String,
}

impl Default for ThreadPoolOptions {
    fn default() -> Self {
        Self {
            num_threads: None,
            thread_name_prefix: "grain-worker".to_string(),
        }
    }
}

impl ThreadPoolOptions {
    pub fn sanitize(&self) -> GrainResult<()> {
        if self.num_threads == Some(0) {
            return Err(GrainError::Config(
                "thread_pool.num_threads must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialOptions {
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// `EnvFilter` directive; `GRAIN_LOG` takes precedence when set.
    pub filter: String,
    /// Write a daily rolling log file here instead of stderr.
    pub log_dir: Option<PathBuf>,
    pub ansi: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            log_dir: None,
            ansi: true,
        }
    }
}
