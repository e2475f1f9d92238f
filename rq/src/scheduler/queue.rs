//! Queue types for the scheduler

use std::collections::VecDeque;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::error::TaskError;

/// What a submitter eventually receives
pub type Outcome<T, E> = Result<T, TaskError<E>>;

/// A deferred operation: invoked once, at execution start
pub type WorkItem<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;

/// A queued unit pairing a work item with its outcome channel
pub struct QueueEntry<T, E> {
    /// Position in submission order, assigned on enqueue
    pub seq: u64,
    pub work: WorkItem<T, E>,
    /// Consumed on send, so an entry can only be settled once
    pub reply: oneshot::Sender<Outcome<T, E>>,
    pub enqueued_at: Instant,
}

/// An entry on its way to the queue, before it has a sequence number
pub struct PendingEntry<T, E> {
    pub work: WorkItem<T, E>,
    pub reply: oneshot::Sender<Outcome<T, E>>,
}

/// FIFO of entries waiting for admission
pub struct TaskQueue<T, E> {
    entries: VecDeque<QueueEntry<T, E>>,
    next_seq: u64,
    peak_depth: usize,
}

impl<T, E> Default for TaskQueue<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> TaskQueue<T, E> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 0,
            peak_depth: 0,
        }
    }

    /// Append at the tail and return the assigned sequence number
    pub fn enqueue(&mut self, pending: PendingEntry<T, E>, now: Instant) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(QueueEntry {
            seq,
            work: pending.work,
            reply: pending.reply,
            enqueued_at: now,
        });
        self.peak_depth = self.peak_depth.max(self.entries.len());
        seq
    }

    /// Remove the head entry
    pub fn dequeue(&mut self) -> Option<QueueEntry<T, E>> {
        self.entries.pop_front()
    }

    /// Drop every queued entry, returning how many there were
    ///
    /// Dropping an entry drops its reply sender, so its submitter sees the
    /// channel close.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peak_depth(&self) -> usize {
        self.peak_depth
    }

    /// Total entries ever enqueued
    pub fn total_enqueued(&self) -> u64 {
        self.next_seq
    }
}

/// Phase of the admission loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopPhase {
    /// Queue empty, no timer armed
    Idle,

    /// Queue non-empty, one timer armed
    Waiting,
}

/// Statistics for the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub executed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub queued: usize,
    pub peak_queue_depth: usize,
    pub timers_armed: u64,
    pub timers_fired: u64,
    pub phase: LoopPhase,
    /// Time left on the armed timer, if any
    #[serde(skip)]
    pub next_check_in: Option<Duration>,
}

impl SchedulerStats {
    /// Work items dispatched but not yet settled
    pub fn in_flight(&self) -> u64 {
        self.executed.saturating_sub(self.succeeded + self.failed + self.panicked)
    }
}
