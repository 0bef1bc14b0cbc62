//! Periodic persistence of a running watch session.
//!
//! A session owns a background task that wakes on every tick of an
//! injectable [`Ticker`], reads the latest playback position and records it
//! through the [`ProgressTracker`]. A failed save is logged and simply
//! retried on the next tick. Stopping (or dropping) the session cancels the
//! ticker; the task then attempts one final flush before it exits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::tracker::{ProgressState, ProgressTracker};

pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);
const FINAL_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait Ticker: Send {
    /// Resolves at the next tick.
    async fn tick(&mut self);
}

/// Wall-clock ticker backed by `tokio::time::interval`. The first tick
/// fires one period after creation.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Ticker driven by hand, for tests and for callers with their own schedule.
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

#[derive(Clone)]
pub struct ManualTickerHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTicker {
    pub fn channel() -> (Self, ManualTickerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, ManualTickerHandle { tx })
    }
}

impl ManualTickerHandle {
    pub fn tick(&self) {
        let _ = self.tx.send(());
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        if self.rx.recv().await.is_none() {
            // Every handle is gone; no more ticks will ever arrive.
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutosaveReport {
    pub saves: u32,
    pub failures: u32,
    pub final_flush_ok: bool,
    pub last_state: Option<ProgressState>,
}

/// Scoped autosave for one (user, video) watch session.
pub struct AutosaveSession {
    position: watch::Sender<Option<f64>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<AutosaveReport>>,
}

impl AutosaveSession {
    pub fn start<T>(
        tracker: Arc<ProgressTracker>,
        user_id: Uuid,
        video_id: Uuid,
        duration_seconds: i64,
        ticker: T,
    ) -> Self
    where
        T: Ticker + 'static,
    {
        let (position, position_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let target = SaveTarget {
            tracker,
            user_id,
            video_id,
            duration_seconds,
            position: position_rx,
        };
        let task = tokio::spawn(run(target, ticker, cancel.clone()));

        Self {
            position,
            cancel,
            task: Some(task),
        }
    }

    /// Latest playback position in seconds, picked up on the next tick.
    pub fn report_position(&self, elapsed_seconds: f64) {
        self.position.send_replace(Some(elapsed_seconds));
    }

    /// Cancels the ticker and waits for the final flush.
    pub async fn stop(mut self) -> AutosaveReport {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|err| {
                warn!(error = %err, "autosave task ended abnormally");
                AutosaveReport::default()
            }),
            None => AutosaveReport::default(),
        }
    }
}

impl Drop for AutosaveSession {
    fn drop(&mut self) {
        // Teardown without `stop`: the task still runs its final flush.
        self.cancel.cancel();
    }
}

struct SaveTarget {
    tracker: Arc<ProgressTracker>,
    user_id: Uuid,
    video_id: Uuid,
    duration_seconds: i64,
    position: watch::Receiver<Option<f64>>,
}

impl SaveTarget {
    async fn flush(&self, report: &mut AutosaveReport) -> bool {
        let latest = *self.position.borrow();
        let Some(elapsed) = latest else {
            return true;
        };
        match self
            .tracker
            .record_progress(self.user_id, self.video_id, elapsed, self.duration_seconds)
            .await
        {
            Ok(state) => {
                report.saves += 1;
                report.last_state = Some(state);
                true
            }
            Err(err) => {
                report.failures += 1;
                warn!(
                    user_id = %self.user_id,
                    video_id = %self.video_id,
                    error = %err,
                    "autosave failed, will retry on next tick"
                );
                false
            }
        }
    }
}

async fn run<T: Ticker>(target: SaveTarget, mut ticker: T, cancel: CancellationToken) -> AutosaveReport {
    let mut report = AutosaveReport::default();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                target.flush(&mut report).await;
            }
        }
    }

    report.final_flush_ok = match tokio::time::timeout(FINAL_FLUSH_TIMEOUT, target.flush(&mut report)).await {
        Ok(ok) => ok,
        Err(_) => {
            warn!(
                user_id = %target.user_id,
                video_id = %target.video_id,
                "final autosave flush timed out"
            );
            false
        }
    };
    debug!(
        saves = report.saves,
        failures = report.failures,
        "autosave session finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::db::{MemoryStore, Progress, ProgressStatus, Store};

    fn setup() -> (Arc<ProgressTracker>, Arc<MemoryStore<Progress>>) {
        let store = Arc::new(MemoryStore::<Progress>::new());
        let tracker = Arc::new(ProgressTracker::new(store.clone(), Arc::new(SystemClock)));
        (tracker, store)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn saves_on_each_tick_and_flushes_on_stop() {
        let (tracker, store) = setup();
        let (user, video) = (Uuid::new_v4(), Uuid::new_v4());
        let (ticker, handle) = ManualTicker::channel();
        let session = AutosaveSession::start(tracker, user, video, 600, ticker);

        session.report_position(30.0);
        handle.tick();
        settle().await;
        session.report_position(60.0);
        handle.tick();
        settle().await;
        session.report_position(75.0);

        let report = session.stop().await;
        assert_eq!(report.saves, 3);
        assert!(report.final_flush_ok);
        let record = store.find_one(&Progress::key(user, video)).await.unwrap().unwrap();
        assert_eq!(record.watch_time_seconds, 75);
        assert_eq!(record.status, ProgressStatus::InProgress);
    }

    #[tokio::test]
    async fn failed_tick_is_retried_on_the_next_one() {
        let (tracker, store) = setup();
        let (user, video) = (Uuid::new_v4(), Uuid::new_v4());
        let (ticker, handle) = ManualTicker::channel();
        let session = AutosaveSession::start(tracker, user, video, 600, ticker);

        session.report_position(45.0);
        store.fail_next_writes(1);
        handle.tick();
        settle().await;
        handle.tick();
        settle().await;

        let report = session.stop().await;
        assert_eq!(report.failures, 1);
        assert!(report.saves >= 1);
        let record = store.find_one(&Progress::key(user, video)).await.unwrap().unwrap();
        assert_eq!(record.watch_time_seconds, 45);
    }

    #[tokio::test]
    async fn no_position_means_nothing_is_written() {
        let (tracker, store) = setup();
        let (ticker, handle) = ManualTicker::channel();
        let session = AutosaveSession::start(tracker, Uuid::new_v4(), Uuid::new_v4(), 600, ticker);

        handle.tick();
        settle().await;
        let report = session.stop().await;

        assert_eq!(report.saves, 0);
        assert!(report.final_flush_ok);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn dropping_the_session_still_flushes() {
        let (tracker, store) = setup();
        let (user, video) = (Uuid::new_v4(), Uuid::new_v4());
        let (ticker, _handle) = ManualTicker::channel();
        let session = AutosaveSession::start(tracker, user, video, 600, ticker);

        session.report_position(580.0);
        drop(session);
        settle().await;

        let record = store.find_one(&Progress::key(user, video)).await.unwrap().unwrap();
        assert_eq!(record.status, ProgressStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_ticker_follows_virtual_time() {
        let (tracker, store) = setup();
        let (user, video) = (Uuid::new_v4(), Uuid::new_v4());
        let session = AutosaveSession::start(
            tracker,
            user,
            video,
            600,
            IntervalTicker::new(DEFAULT_AUTOSAVE_INTERVAL),
        );
        session.report_position(10.0);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(store.is_empty().await);

        tokio::time::sleep(Duration::from_secs(32)).await;
        let report = session.stop().await;
        assert_eq!(report.saves, 3);
    }
}
