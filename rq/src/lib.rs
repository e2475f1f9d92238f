//! ratequeue - rate-limited, order-preserving task scheduler
//!
//! ratequeue accepts async work items and starts them one at a time, in the
//! order they were submitted, no faster than N starts per T seconds. Each
//! submitter gets a future that settles exactly once with the outcome of its
//! own work item.
//!
//! # Core Concepts
//!
//! - **Start spacing**: consecutive starts are at least `T / N` apart; a slow
//!   work item does not hold back the next start
//! - **Single owner**: one task owns the queue, the admission gate and the
//!   one armed timer; handles only send messages
//! - **Idle when empty**: no timer is armed while nothing is queued
//!
//! # Modules
//!
//! - [`scheduler`] - Queue, admission gate and scheduler task
//! - [`config`] - Configuration types and loading
//! - [`runner`] - Shell command work items used by the `rq` binary
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use ratequeue::scheduler::{RateOptions, RateScheduler};
//!
//! # async fn demo() {
//! let handle = RateScheduler::<u32, String>::from_options(&RateOptions::new(2, 1.0)).spawn();
//! let first = handle.submit(|| async { Ok(1) });
//! let second = handle.submit(|| async { Ok(2) });
//! assert_eq!(first.await, Ok(1));
//! assert_eq!(second.await, Ok(2));
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod runner;
pub mod scheduler;

// Re-export commonly used types
pub use config::{Config, RunnerConfig};
pub use runner::{CommandError, CommandOutput};
pub use scheduler::{
    LoopPhase, RateOptions, RateScheduler, SchedulerConfig, SchedulerHandle, SchedulerStats, Submission, TaskError,
    Timer, TokioTimer,
};
