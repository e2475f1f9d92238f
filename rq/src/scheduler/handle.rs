//! SchedulerHandle - Client interface for submitting work

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use eyre::{Result, eyre};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::error::TaskError;
use super::messages::SchedRequest;
use super::queue::{Outcome, PendingEntry, SchedulerStats, WorkItem};

/// Handle for submitting work to a running [`RateScheduler`](super::RateScheduler)
///
/// Cloneable; every clone feeds the same queue.
pub struct SchedulerHandle<T, E> {
    tx: mpsc::UnboundedSender<SchedRequest<T, E>>,
}

impl<T, E> Clone for SchedulerHandle<T, E> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T, E> SchedulerHandle<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(tx: mpsc::UnboundedSender<SchedRequest<T, E>>) -> Self {
        Self { tx }
    }

    /// Queue a work item and get a future for its outcome
    ///
    /// The item is appended to the queue before this returns, so the order of
    /// `submit` calls is the order of execution. `work` is not invoked until
    /// the scheduler admits it.
    pub fn submit<F, Fut>(&self, work: F) -> Submission<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let work: WorkItem<T, E> = Box::new(move || work().boxed());

        if self.tx.send(SchedRequest::Submit(PendingEntry { work, reply })).is_err() {
            // The entry (and its reply sender) came back in the error and is
            // dropped here, so the submission resolves to Closed.
            debug!("SchedulerHandle::submit: scheduler channel closed");
        }

        Submission { rx }
    }

    /// Current scheduler statistics
    pub async fn stats(&self) -> Result<SchedulerStats> {
        debug!("SchedulerHandle::stats: called");
        let (reply_tx, reply_rx) = oneshot::channel();

        self.tx
            .send(SchedRequest::GetStats { reply_tx })
            .map_err(|_| eyre!("Scheduler channel closed"))?;

        reply_rx.await.map_err(|_| eyre!("Scheduler shutdown before reply"))
    }

    /// Stop the scheduler; queued work resolves to [`TaskError::Closed`]
    pub fn shutdown(&self) -> Result<()> {
        debug!("SchedulerHandle::shutdown: called");
        self.tx
            .send(SchedRequest::Shutdown)
            .map_err(|_| eyre!("Scheduler channel closed"))
    }

    /// Whether the scheduler task has stopped accepting requests
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Future for the outcome of one submitted work item
///
/// Resolves exactly once: with the item's value, its error wrapped in
/// [`TaskError::Failed`], a caught panic, or [`TaskError::Closed`] if the
/// scheduler went away first.
#[must_use = "dropping a Submission discards the work item's outcome"]
pub struct Submission<T, E> {
    rx: oneshot::Receiver<Outcome<T, E>>,
}

impl<T, E> Future for Submission<T, E> {
    type Output = Outcome<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Closed)))
    }
}
