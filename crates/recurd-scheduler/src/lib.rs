//! `recurd-scheduler`: recurring job scheduler with SQLite persistence.
//!
//! # Overview
//!
//! Job definitions live in the `recurring_jobs` table. [`SchedulerEngine`]
//! turns every active job into a live timer keyed by its `job_key`, and a
//! dispatch loop fires due timers on a fixed tick. Each firing runs the job's
//! registered [`JobFunction`] on its own task, records an [`Execution`] row and
//! folds the outcome into the job's counters in one transaction.
//!
//! # Job status
//!
//! | Status      | Live timer | Left by                               |
//! |-------------|------------|---------------------------------------|
//! | `active`    | yes        | pause, run budget spent, schedule failure |
//! | `paused`    | no         | resume                                |
//! | `completed` | no         | update                                |
//! | `error`     | no         | update                                |

pub mod db;
pub mod engine;
pub mod error;
pub mod execution;
pub mod registry;
mod runner;
pub mod schedule;
pub mod store;
pub mod types;

pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use execution::{format_duration_ms, parse_output, ExecutionLog, LogLevel, OutputLine};
pub use registry::{FunctionRegistry, JobContext, JobFunction};
pub use schedule::CronSchedule;
pub use store::JobStore;
pub use types::{Execution, ExecutionFilter, Job, JobSpec, JobStatus};
