//! Timer capability used by the admission loop

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::Instant;

/// Source of time and single-shot delays
///
/// The scheduler holds at most one sleep future at a time. Dropping that
/// future cancels the timer.
pub trait Timer: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()>;
}

/// Timer backed by the tokio runtime clock
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(delay).boxed()
    }
}
