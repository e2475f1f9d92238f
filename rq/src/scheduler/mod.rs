//! Rate-limited scheduler for async work items
//!
//! Work items are queued in submission order and started one at a time, with
//! consecutive starts spaced by at least `window / max_executions`. A single
//! task owns the queue, the admission gate and the one armed timer; callers
//! talk to it through a cloneable [`SchedulerHandle`].

mod config;
mod core;
mod error;
mod gate;
mod handle;
mod messages;
mod queue;
mod timer;

pub use config::{DEFAULT_MAX_EXECUTIONS, DEFAULT_SAFETY_MARGIN, DEFAULT_WINDOW_SECS, RateOptions, SchedulerConfig};
pub use core::RateScheduler;
pub use error::TaskError;
pub use gate::{Admission, RateGate};
pub use handle::{SchedulerHandle, Submission};
pub use messages::SchedRequest;
pub use queue::{LoopPhase, Outcome, PendingEntry, QueueEntry, SchedulerStats, TaskQueue, WorkItem};
pub use timer::{Timer, TokioTimer};
