//! Scheduler task implementation

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::{RateOptions, SchedulerConfig};
use super::error::{TaskError, panic_message};
use super::gate::{Admission, RateGate};
use super::handle::SchedulerHandle;
use super::messages::SchedRequest;
use super::queue::{LoopPhase, PendingEntry, QueueEntry, SchedulerStats, TaskQueue};
use super::timer::{Timer, TokioTimer};

/// Deadline horizon used when a wait does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Settlement counts, written by dispatched work items
#[derive(Default)]
struct SettleCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Admission loop state; `Waiting` owns the only armed timer
enum LoopState {
    Idle,
    Waiting {
        deadline: Instant,
        sleep: BoxFuture<'static, ()>,
    },
}

impl LoopState {
    fn is_waiting(&self) -> bool {
        matches!(self, LoopState::Waiting { .. })
    }

    fn phase(&self) -> LoopPhase {
        match self {
            LoopState::Idle => LoopPhase::Idle,
            LoopState::Waiting { .. } => LoopPhase::Waiting,
        }
    }

    /// Completes when the armed timer fires; never completes while idle
    async fn fired(&mut self) {
        match self {
            LoopState::Waiting { sleep, .. } => sleep.await,
            LoopState::Idle => std::future::pending().await,
        }
    }
}

/// Queue, gate and timer, owned by the scheduler task alone
struct Engine<T, E> {
    queue: TaskQueue<T, E>,
    gate: RateGate,
    timer: Arc<dyn Timer>,
    safety_margin: Duration,
    state: LoopState,
    counters: Arc<SettleCounters>,
    executed: u64,
    timers_armed: u64,
    timers_fired: u64,
}

impl<T, E> Engine<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn new(config: SchedulerConfig, timer: Arc<dyn Timer>) -> Self {
        Self {
            queue: TaskQueue::new(),
            gate: RateGate::new(config.min_interval()),
            timer,
            safety_margin: config.safety_margin,
            state: LoopState::Idle,
            counters: Arc::new(SettleCounters::default()),
            executed: 0,
            timers_armed: 0,
            timers_fired: 0,
        }
    }

    fn submit(&mut self, pending: PendingEntry<T, E>) {
        let seq = self.queue.enqueue(pending, self.timer.now());
        debug!(seq, queued = self.queue.len(), "Engine::submit: enqueued");
        self.check_admission();
    }

    fn on_timer(&mut self) {
        debug!(queued = self.queue.len(), "Engine::on_timer: called");
        self.timers_fired += 1;
        self.state = LoopState::Idle;
        self.check_admission();
    }

    /// Run admitted entries, then either go idle or arm one timer
    ///
    /// On return the queue is empty exactly when the state is `Idle`.
    fn check_admission(&mut self) {
        loop {
            if self.queue.is_empty() {
                if self.state.is_waiting() {
                    debug!("Engine::check_admission: queue drained, dropping timer");
                }
                self.state = LoopState::Idle;
                return;
            }

            if self.state.is_waiting() {
                return;
            }

            let now = self.timer.now();
            match self.gate.check(now) {
                Admission::Admit => self.execute_head(now),
                Admission::Wait(remaining) => {
                    let delay = remaining.saturating_add(self.safety_margin);
                    let deadline = now
                        .checked_add(delay)
                        .or_else(|| now.checked_add(FAR_FUTURE))
                        .unwrap_or(now);
                    debug!(?remaining, ?delay, "Engine::check_admission: arming timer");
                    self.state = LoopState::Waiting {
                        deadline,
                        sleep: self.timer.sleep(delay),
                    };
                    self.timers_armed += 1;
                    return;
                }
            }
        }
    }

    fn execute_head(&mut self, now: Instant) {
        if self.queue.is_empty() {
            return;
        }

        self.gate.record_start(now);
        if let Some(entry) = self.queue.dequeue() {
            self.executed += 1;
            self.dispatch(entry, now);
        }
    }

    /// Start the work item and forward its outcome once it settles
    fn dispatch(&self, entry: QueueEntry<T, E>, now: Instant) {
        let QueueEntry {
            seq,
            work,
            reply,
            enqueued_at,
        } = entry;
        debug!(seq, waited = ?now.saturating_duration_since(enqueued_at), "Engine::dispatch: starting work item");

        let future = match std::panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(future) => future,
            Err(payload) => {
                let message = panic_message(payload);
                warn!(seq, %message, "Work item panicked before returning a future");
                self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                let _ = reply.send(Err(TaskError::Panicked(message)));
                return;
            }
        };

        let counters = Arc::clone(&self.counters);
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(value)) => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    Ok(value)
                }
                Ok(Err(error)) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    Err(TaskError::Failed(error))
                }
                Err(payload) => {
                    let message = panic_message(payload);
                    warn!(seq, %message, "Work item panicked");
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    Err(TaskError::Panicked(message))
                }
            };

            if reply.send(outcome).is_err() {
                debug!(seq, "Submission dropped before its outcome was delivered");
            }
        });
    }

    /// Release everything still queued
    fn shutdown(&mut self) {
        self.state = LoopState::Idle;
        let dropped = self.queue.clear();
        if dropped > 0 {
            warn!(dropped, "Scheduler stopped with work still queued");
        }
    }

    fn stats(&self) -> SchedulerStats {
        let next_check_in = match &self.state {
            LoopState::Waiting { deadline, .. } => Some(deadline.saturating_duration_since(self.timer.now())),
            LoopState::Idle => None,
        };

        SchedulerStats {
            submitted: self.queue.total_enqueued(),
            executed: self.executed,
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            queued: self.queue.len(),
            peak_queue_depth: self.queue.peak_depth(),
            timers_armed: self.timers_armed,
            timers_fired: self.timers_fired,
            phase: self.state.phase(),
            next_check_in,
        }
    }
}

/// Runs submitted work items one at a time, in submission order, no faster
/// than the configured rate
///
/// All queue and timer state lives inside the task started by [`run`](Self::run);
/// callers interact through [`SchedulerHandle`]s.
pub struct RateScheduler<T, E> {
    config: SchedulerConfig,
    timer: Arc<dyn Timer>,
    tx: mpsc::UnboundedSender<SchedRequest<T, E>>,
    rx: mpsc::UnboundedReceiver<SchedRequest<T, E>>,
}

impl<T, E> RateScheduler<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create a new scheduler with the given configuration
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_timer(config, Arc::new(TokioTimer))
    }

    /// Create a scheduler from loose rate options, defaulting what is unusable
    pub fn from_options(options: &RateOptions) -> Self {
        Self::new(SchedulerConfig::from_options(options))
    }

    /// Create a scheduler driven by a custom timer
    pub fn with_timer(config: SchedulerConfig, timer: Arc<dyn Timer>) -> Self {
        debug!(?config, "RateScheduler::with_timer: called");
        let (tx, rx) = mpsc::unbounded_channel();
        Self { config, timer, tx, rx }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Get a handle for submitting work
    pub fn handle(&self) -> SchedulerHandle<T, E> {
        SchedulerHandle::new(self.tx.clone())
    }

    /// Spawn the scheduler task and return a handle to it
    pub fn spawn(self) -> SchedulerHandle<T, E> {
        let handle = self.handle();
        tokio::spawn(self.run());
        handle
    }

    /// Run the scheduler task
    ///
    /// Runs until a shutdown request arrives, or until every handle is
    /// dropped and the queue has drained.
    pub async fn run(self) {
        let Self { config, timer, tx, mut rx } = self;
        drop(tx);

        let mut engine = Engine::<T, E>::new(config, timer);
        let mut closed = false;

        info!(
            max_executions = config.max_executions,
            window = ?config.window,
            min_interval = ?engine.gate.min_interval(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                request = rx.recv(), if !closed => match request {
                    Some(SchedRequest::Submit(pending)) => engine.submit(pending),
                    Some(SchedRequest::GetStats { reply_tx }) => {
                        let _ = reply_tx.send(engine.stats());
                    }
                    Some(SchedRequest::Shutdown) => {
                        info!("Scheduler shutdown requested");
                        engine.shutdown();
                        break;
                    }
                    None => {
                        debug!(queued = engine.queue.len(), "RateScheduler::run: all handles dropped");
                        closed = true;
                    }
                },
                () = engine.state.fired(), if engine.state.is_waiting() => engine.on_timer(),
                else => break,
            }

            if closed && engine.queue.is_empty() {
                break;
            }
        }

        info!(executed = engine.executed, "Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn scheduler(no_requests: i64, per_seconds: f64) -> SchedulerHandle<&'static str, String> {
        RateScheduler::from_options(&RateOptions::new(no_requests, per_seconds)).spawn()
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_per_second_spacing_and_values() {
        let handle = scheduler(2, 1.0);
        let starts = Arc::new(Mutex::new(Vec::new()));
        let t0 = Instant::now();

        let submissions: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|value| {
                let starts = starts.clone();
                handle.submit(move || {
                    starts.lock().unwrap().push(Instant::now());
                    async move { Ok(value) }
                })
            })
            .collect();

        let mut values = Vec::new();
        for submission in submissions {
            values.push(submission.await.unwrap());
        }
        assert_eq!(values, vec!["a", "b", "c"]);

        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 3);
        assert!(starts[0] - t0 < Duration::from_millis(5));
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(500), "gap {gap:?} too short");
            assert!(gap <= Duration::from_millis(560), "gap {gap:?} too long");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_passes_through_and_next_item_runs() {
        let handle = scheduler(1, 1.0);

        let failing = handle.submit(|| async { Err("E".to_string()) });
        let started_at = Arc::new(Mutex::new(None));
        let started = started_at.clone();
        let next = handle.submit(move || {
            *started.lock().unwrap() = Some(Instant::now());
            async { Ok("after") }
        });

        let t0 = Instant::now();
        assert_eq!(failing.await, Err(TaskError::Failed("E".to_string())));
        assert_eq!(next.await, Ok("after"));

        let started = started_at.lock().unwrap().expect("second item should have started");
        assert!(started - t0 >= Duration::from_secs(1));
        assert!(started - t0 <= Duration::from_millis(1060));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_after_drain_arms_no_timers() {
        let handle = scheduler(4, 1.0);

        for _ in 0..3 {
            let _ = handle.submit(|| async { Ok("x") });
        }
        let last = handle.submit(|| async { Ok("last") });
        assert_eq!(last.await, Ok("last"));

        let drained = handle.stats().await.unwrap();
        assert_eq!(drained.phase, LoopPhase::Idle);
        assert_eq!(drained.queued, 0);
        assert_eq!(drained.timers_armed, 3);
        assert_eq!(drained.timers_fired, 3);
        assert!(drained.next_check_in.is_none());

        tokio::time::sleep(Duration::from_secs(30)).await;

        let later = handle.stats().await.unwrap();
        assert_eq!(later.timers_armed, drained.timers_armed);
        assert_eq!(later.timers_fired, drained.timers_fired);
        assert_eq!(later.phase, LoopPhase::Idle);

        // Long idle means the next submission is admitted without a timer
        assert_eq!(handle.submit(|| async { Ok("again") }).await, Ok("again"));
        assert_eq!(handle.stats().await.unwrap().timers_armed, drained.timers_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_timer_while_waiting() {
        let handle = scheduler(1, 10.0);

        let submissions: Vec<_> = (0..5).map(|_| handle.submit(|| async { Ok("x") })).collect();
        tokio::task::yield_now().await;

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.executed, 1);
        assert_eq!(stats.queued, 4);
        assert_eq!(stats.timers_armed, 1);
        assert_eq!(stats.phase, LoopPhase::Waiting);
        let next = stats.next_check_in.unwrap();
        assert!(next > Duration::from_secs(10) && next <= Duration::from_millis(10_050));

        for submission in submissions {
            submission.await.unwrap();
        }
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.timers_armed, 4);
        assert_eq!(stats.succeeded, 5);
        assert_eq!(stats.peak_queue_depth, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_item_does_not_delay_next_start() {
        let handle = scheduler(1, 1.0);
        let t0 = Instant::now();

        let slow = handle.submit(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("slow")
        });
        let fast = handle.submit(|| async { Ok("fast") });

        assert_eq!(fast.await, Ok("fast"));
        assert!(Instant::now() - t0 < Duration::from_secs(2));
        assert_eq!(slow.await, Ok("slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_waits_keep_scheduler_running() {
        let huge_window: SchedulerHandle<u32, String> = RateScheduler::from_options(&RateOptions::new(1, 1e19)).spawn();
        let huge_margin: SchedulerHandle<u32, String> =
            RateScheduler::new(SchedulerConfig::default().with_safety_margin(Duration::MAX)).spawn();

        for handle in [huge_window, huge_margin] {
            let first = handle.submit(|| async { Ok(1) });
            let _second = handle.submit(|| async { Ok(2) });
            assert_eq!(first.await, Ok(1));

            let stats = handle.stats().await.unwrap();
            assert_eq!(stats.phase, LoopPhase::Waiting);
            assert_eq!(stats.queued, 1);
            assert_eq!(stats.timers_armed, 1);
            assert!(stats.next_check_in.unwrap() > Duration::from_secs(86400 * 365));
            assert!(!handle.is_closed());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panics_are_caught() {
        let handle = scheduler(10, 1.0);

        let sync_panic = handle.submit(|| -> futures::future::Ready<Result<&'static str, String>> {
            panic!("thunk exploded")
        });
        let async_panic = handle.submit(|| async {
            if true {
                panic!("future exploded");
            }
            Ok("unreachable")
        });
        let fine = handle.submit(|| async { Ok("fine") });

        assert_eq!(sync_panic.await, Err(TaskError::Panicked("thunk exploded".to_string())));
        assert_eq!(async_panic.await, Err(TaskError::Panicked("future exploded".to_string())));
        assert_eq!(fine.await, Ok("fine"));

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.panicked, 2);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_queued_entries() {
        let handle = scheduler(1, 60.0);

        let first = handle.submit(|| async { Ok("first") });
        let second = handle.submit(|| async { Ok("second") });
        handle.shutdown().unwrap();

        assert_eq!(first.await, Ok("first"));
        assert_eq!(second.await, Err(TaskError::Closed));
        tokio::task::yield_now().await;
        assert!(handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_still_drains_queue() {
        let handle = scheduler(2, 1.0);

        let submissions: Vec<_> = (0..4).map(|_| handle.submit(|| async { Ok("x") })).collect();
        drop(handle);

        for submission in submissions {
            assert_eq!(submission.await, Ok("x"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_timer_is_used() {
        struct CountingTimer {
            sleeps: AtomicU64,
        }

        impl Timer for CountingTimer {
            fn now(&self) -> Instant {
                Instant::now()
            }

            fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()> {
                self.sleeps.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).boxed()
            }
        }

        let timer = Arc::new(CountingTimer { sleeps: AtomicU64::new(0) });
        let config = SchedulerConfig::from_options(&RateOptions::new(5, 1.0)).with_safety_margin(Duration::ZERO);
        let handle: SchedulerHandle<u32, String> = RateScheduler::with_timer(config, timer.clone()).spawn();

        let submissions: Vec<_> = (0..3u32).map(|i| handle.submit(move || async move { Ok(i) })).collect();
        for (i, submission) in submissions.into_iter().enumerate() {
            assert_eq!(submission.await, Ok(i as u32));
        }

        assert_eq!(timer.sleeps.load(Ordering::SeqCst), 2);
    }
}
