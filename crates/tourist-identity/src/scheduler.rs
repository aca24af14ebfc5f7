//! Periodic driver of reconciliation cycles.
//!
//! The scheduler runs one cycle immediately at start, then one per tick.
//! A tick that fires while a cycle is still running is dropped (and
//! counted) rather than queued. Shutdown stops the ticker, lets the
//! in-flight cycle finish the record it is on, and only then reports
//! [`SchedulerState::Stopped`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::engine::Reconciler;
use crate::report::{LogSink, SummarySink};

/// Lifecycle state of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Default)]
struct SchedulerStats {
    cycles_completed: AtomicU64,
    overlaps_skipped: AtomicU64,
}

/// Resets the running flag when a cycle task ends, including by panic.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Scheduler configuration. Call [`Scheduler::start`] to spawn it.
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    sink: Arc<dyn SummarySink>,
}

impl Scheduler {
    pub fn new(reconciler: Reconciler, interval: Duration) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            interval,
            sink: Arc::new(LogSink),
        }
    }

    /// Replace the default [`LogSink`].
    pub fn with_sink(mut self, sink: impl SummarySink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Spawn the scheduler loop on the current runtime.
    pub fn start(self) -> SchedulerHandle {
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(SchedulerStats::default());

        let driver = Driver {
            reconciler: self.reconciler,
            sink: self.sink,
            state: Arc::new(state_tx),
            stats: Arc::clone(&stats),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(driver.run(self.interval));

        SchedulerHandle {
            state: state_rx,
            shutdown: shutdown_tx,
            stats,
            task,
        }
    }
}

struct Driver {
    reconciler: Arc<Reconciler>,
    sink: Arc<dyn SummarySink>,
    state: Arc<watch::Sender<SchedulerState>>,
    stats: Arc<SchedulerStats>,
    running: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
}

impl Driver {
    async fn run(self, period: Duration) {
        log::info!(
            "scheduler started (interval {}s, {} enumeration)",
            period.as_secs(),
            self.reconciler.strategy()
        );

        let mut shutdown = self.shutdown.clone();
        let mut in_flight = self.launch();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.launch() {
                        Some(handle) => in_flight = Some(handle),
                        None => {
                            self.stats.overlaps_skipped.fetch_add(1, Ordering::SeqCst);
                            log::warn!("SkippedOverlap: previous reconciliation cycle still running");
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        log::info!("scheduler stopping; draining in-flight cycle");
        if let Some(handle) = in_flight.take() {
            if let Err(e) = handle.await {
                log::error!("reconciliation cycle task failed: {e}");
            }
        }
        self.state.send_replace(SchedulerState::Stopped);
        log::info!("scheduler stopped");
    }

    /// Start a cycle unless one is already running.
    fn launch(&self) -> Option<JoinHandle<()>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        self.state.send_replace(SchedulerState::Running);

        let guard = RunningGuard(Arc::clone(&self.running));
        let reconciler = Arc::clone(&self.reconciler);
        let sink = Arc::clone(&self.sink);
        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            let summary = reconciler.run_cycle(&shutdown).await;
            sink.emit(&summary);
            stats.cycles_completed.fetch_add(1, Ordering::SeqCst);
            // Idle must be published before the next launch can claim the flag.
            state.send_if_modified(|s| {
                if *s == SchedulerState::Running {
                    *s = SchedulerState::Idle;
                    true
                } else {
                    false
                }
            });
            drop(guard);
        }))
    }
}

/// Control handle of a running scheduler.
pub struct SchedulerHandle {
    state: watch::Receiver<SchedulerState>,
    shutdown: watch::Sender<bool>,
    stats: Arc<SchedulerStats>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.stats.cycles_completed.load(Ordering::SeqCst)
    }

    pub fn overlaps_skipped(&self) -> u64 {
        self.stats.overlaps_skipped.load(Ordering::SeqCst)
    }

    /// Request shutdown and wait until the in-flight cycle has drained.
    pub async fn shutdown(self) -> SchedulerState {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            log::error!("scheduler task failed: {e}");
        }
        *self.state.borrow()
    }
}
