//! Periodic, coalescing update driver
//!
//! A [`Worker`] runs one [`Job`] on its own task. Two triggers feed a
//! single-slot queue: a ticker and an explicit kick (sent once at start).
//! Whatever arrives while an update is already pending or running is
//! collapsed, so a slow remote never builds up a backlog of cycles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Progress of an entity's update cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatingState {
    #[default]
    InProcess,
    Done,
    Failed,
}

/// What a ticker tick should do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickAction {
    /// A cycle is still running, drop the tick
    Skip,
    /// Queue one cycle
    Enqueue,
    /// Stop the worker for good
    Retire,
}

impl TickAction {
    /// The coalescing rule: ticks never pile up behind a running cycle
    pub fn for_state(updating: UpdatingState) -> Self {
        match updating {
            UpdatingState::InProcess => TickAction::Skip,
            UpdatingState::Done | UpdatingState::Failed => TickAction::Enqueue,
        }
    }
}

/// Outcome bookkeeping shared by services and routes
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateStatus {
    pub updating: UpdatingState,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl UpdateStatus {
    pub fn begin(&mut self) {
        self.updating = UpdatingState::InProcess;
    }

    pub fn succeed(&mut self, at: DateTime<Utc>) {
        self.updating = UpdatingState::Done;
        self.error = None;
        self.last_updated = Some(at);
    }

    pub fn fail(&mut self, error: impl ToString) {
        self.updating = UpdatingState::Failed;
        self.error = Some(error.to_string());
    }
}

/// Work driven by a [`Worker`]
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Used in log lines
    fn label(&self) -> String;

    /// Decide what a tick does; evaluated on the worker task
    async fn on_tick(&self) -> TickAction;

    /// One update cycle, `at` being the moment it started
    async fn run(&self, at: DateTime<Utc>);
}

/// Handle to a running job loop
pub struct Worker {
    kick: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn the loop; an update is queued immediately, then every `period`
    pub fn start<J: Job>(job: Arc<J>, period: Duration) -> Self {
        let (kick, mut pending) = mpsc::channel::<()>(1);
        let _ = kick.try_send(());
        let trigger = kick.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match job.on_tick().await {
                            TickAction::Skip => {
                                tracing::trace!(job = %job.label(), "still updating, tick skipped");
                            }
                            TickAction::Enqueue => {
                                // a full slot means an update is already pending
                                let _ = trigger.try_send(());
                            }
                            TickAction::Retire => {
                                tracing::info!(job = %job.label(), "retired");
                                break;
                            }
                        }
                    }
                    Some(()) = pending.recv() => {
                        job.run(Utc::now()).await;
                    }
                }
            }
        });

        Self { kick, handle }
    }

    /// Ask for an update outside the schedule; coalesced with any pending one
    pub fn kick(&self) -> bool {
        self.kick.try_send(()).is_ok()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct Counting {
        runs: AtomicU32,
        retire: AtomicBool,
        busy: AtomicBool,
        run_time: Duration,
    }

    impl Counting {
        fn new(run_time: Duration) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicU32::new(0),
                retire: AtomicBool::new(false),
                busy: AtomicBool::new(false),
                run_time,
            })
        }
    }

    #[async_trait]
    impl Job for Counting {
        fn label(&self) -> String {
            "counting".into()
        }

        async fn on_tick(&self) -> TickAction {
            if self.retire.load(Ordering::SeqCst) {
                return TickAction::Retire;
            }
            if self.busy.load(Ordering::SeqCst) {
                TickAction::Skip
            } else {
                TickAction::Enqueue
            }
        }

        async fn run(&self, _at: DateTime<Utc>) {
            self.busy.store(true, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.run_time).await;
            self.busy.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_tick_action_coalesces() {
        assert_eq!(TickAction::for_state(UpdatingState::InProcess), TickAction::Skip);
        assert_eq!(TickAction::for_state(UpdatingState::Done), TickAction::Enqueue);
        assert_eq!(TickAction::for_state(UpdatingState::Failed), TickAction::Enqueue);
    }

    #[test]
    fn test_update_status_transitions() {
        let mut s = UpdateStatus::default();
        assert_eq!(s.updating, UpdatingState::InProcess);

        s.fail("boom");
        assert_eq!(s.updating, UpdatingState::Failed);
        assert_eq!(s.error.as_deref(), Some("boom"));
        assert!(s.last_updated.is_none());

        let at = Utc::now();
        s.begin();
        s.succeed(at);
        assert_eq!(s.updating, UpdatingState::Done);
        assert!(s.error.is_none());
        assert_eq!(s.last_updated, Some(at));
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_runs_immediately_then_every_period() {
        let job = Counting::new(Duration::from_millis(1));
        let worker = Worker::start(job.clone(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 4);
        worker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycle_does_not_queue_ticks() {
        // each run outlasts five ticks
        let job = Counting::new(Duration::from_secs(55));
        let worker = Worker::start(job.clone(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        // first tick after the run ends queues exactly one more
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
        worker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retire_ends_loop() {
        let job = Counting::new(Duration::from_millis(1));
        let worker = Worker::start(job.clone(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(10)).await;
        job.retire.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(worker.is_finished());
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_coalesces_with_pending() {
        let job = Counting::new(Duration::from_secs(5));
        let worker = Worker::start(job.clone(), Duration::from_secs(3600));

        tokio::time::sleep(Duration::from_millis(10)).await;
        // first run in progress: one kick fills the slot, the rest are dropped
        assert!(worker.kick());
        assert!(!worker.kick());
        assert!(!worker.kick());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
        worker.stop();
    }
}
