//! Messages sent from handles to the scheduler task

use tokio::sync::oneshot;

use super::queue::{PendingEntry, SchedulerStats};

/// Requests processed by the scheduler task
pub enum SchedRequest<T, E> {
    /// Append a work item to the queue
    Submit(PendingEntry<T, E>),

    /// Snapshot the scheduler statistics
    GetStats { reply_tx: oneshot::Sender<SchedulerStats> },

    /// Stop the scheduler, releasing anything still queued
    Shutdown,
}

impl<T, E> std::fmt::Debug for SchedRequest<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedRequest::Submit(_) => f.write_str("Submit"),
            SchedRequest::GetStats { .. } => f.write_str("GetStats"),
            SchedRequest::Shutdown => f.write_str("Shutdown"),
        }
    }
}
