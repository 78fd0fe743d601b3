//! Scheduling many stages: bounded concurrency and ordered sequences.
//!
//! ## Architecture
//!
//! ```text
//! ProductionLine ── add ──→ [serial queue] ── admit ──→ execute(stage, env)
//!       ▲                                                    │
//!       └──────────── completion (dispatched on queue) ◀─────┘
//!
//! Serial: Start(stages) → Running(current, remaining) → … → Completed(outcomes)
//! ```
//!
//! - `ProductionLine`: runs up to N stages at once, queues the rest (FIFO)
//! - `Serial`: a stage that runs other stages one at a time, in order
//!
//! ## Example
//!
//! ```ignore
//! use grain::pipeline::{FailurePolicy, ProductionLine, serially};
//!
//! let line = ProductionLine::new(2, env.clone())?;
//! line.add_all(downloads);
//! let outcomes = line.drain_completed().await?;
//!
//! let ordered = serially(migrations, env, FailurePolicy::FailFast).await?;
//! ```

mod metrics;
mod production_line;
mod serial;

pub use metrics::LineMetrics;
pub use production_line::{LineStatus, ProductionLine};
pub use serial::{FailurePolicy, Serial, serially};
