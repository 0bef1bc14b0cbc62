use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{Changes, Progress, ProgressStatus, Store};
use crate::error::{AppError, AppResult};

/// Share of the video that must be reached for completion, in percent.
pub const COMPLETION_PERCENT: f64 = 95.0;

/// What a caller sees after a tick was recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressState {
    pub user_id: Uuid,
    pub video_id: Uuid,
    pub watch_time_seconds: i64,
    pub status: ProgressStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// True only for the call that flipped the record to `completed`.
    pub just_completed: bool,
}

impl ProgressState {
    fn from_record(record: &Progress, just_completed: bool) -> Self {
        Self {
            user_id: record.user_id,
            video_id: record.video_id,
            watch_time_seconds: record.watch_time_seconds,
            status: record.status,
            completed_at: record.completed_at,
            just_completed,
        }
    }
}

pub fn reaches_completion(elapsed_seconds: f64, duration_seconds: i64) -> bool {
    elapsed_seconds * 100.0 >= duration_seconds as f64 * COMPLETION_PERCENT
}

/// Column changes for one tick against a record that is not yet completed.
///
/// Every assignment is a merge, not an overwrite: watch time only grows,
/// `completed` is terminal and `completed_at` is written once. Two ticks
/// racing on the same row therefore converge on the same result.
pub fn plan_tick(elapsed_seconds: f64, duration_seconds: i64, now: OffsetDateTime) -> Changes {
    let changes = Changes::new().set("updated_at", now);
    if reaches_completion(elapsed_seconds, duration_seconds) {
        changes
            .max("watch_time_seconds", duration_seconds)
            .latch(
                "status",
                ProgressStatus::Completed,
                ProgressStatus::Completed,
            )
            .set_once("completed_at", now)
    } else {
        changes
            .max("watch_time_seconds", elapsed_seconds.floor() as i64)
            .latch(
                "status",
                ProgressStatus::InProgress,
                ProgressStatus::Completed,
            )
    }
}

/// Whether this tick is the one that completed the record. A writer that
/// completed the row between our read and our update does not count, unless
/// it also crossed the threshold at the same instant.
pub fn completed_by_tick(
    before: &Progress,
    after: &Progress,
    elapsed_seconds: f64,
    duration_seconds: i64,
    now: OffsetDateTime,
) -> bool {
    !before.is_completed()
        && after.is_completed()
        && reaches_completion(elapsed_seconds, duration_seconds)
        && after.completed_at == Some(now)
}

/// Owns the watch-progress state machine for (user, video) pairs.
pub struct ProgressTracker {
    progress: Arc<dyn Store<Progress>>,
    clock: Arc<dyn Clock>,
}

impl ProgressTracker {
    pub fn new(progress: Arc<dyn Store<Progress>>, clock: Arc<dyn Clock>) -> Self {
        Self { progress, clock }
    }

    pub async fn get_progress(&self, user_id: Uuid, video_id: Uuid) -> AppResult<Option<Progress>> {
        Ok(self
            .progress
            .find_one(&Progress::key(user_id, video_id))
            .await?)
    }

    /// Records one watch tick. Creates the record on first sight, then merges
    /// the tick into it. Completed records are returned untouched.
    pub async fn record_progress(
        &self,
        user_id: Uuid,
        video_id: Uuid,
        elapsed_seconds: f64,
        duration_seconds: i64,
    ) -> AppResult<ProgressState> {
        if !elapsed_seconds.is_finite() || elapsed_seconds < 0.0 {
            return Err(AppError::Validation(
                "elapsed seconds must be a non-negative number".to_string(),
            ));
        }
        if duration_seconds <= 0 {
            return Err(AppError::Validation(
                "duration seconds must be positive".to_string(),
            ));
        }

        let now = self.clock.now();
        let existing = match self.get_progress(user_id, video_id).await? {
            Some(record) => record,
            None => {
                self.progress
                    .create_unique(Progress::new(user_id, video_id, now))
                    .await?
                    .entity
            }
        };

        if existing.is_completed() {
            debug!(%user_id, %video_id, "progress already completed, tick ignored");
            return Ok(ProgressState::from_record(&existing, false));
        }

        let changes = plan_tick(elapsed_seconds, duration_seconds, now);
        let updated = self.progress.update(existing.id, &changes).await?;

        let just_completed =
            completed_by_tick(&existing, &updated, elapsed_seconds, duration_seconds, now);
        if just_completed {
            info!(
                %user_id,
                %video_id,
                watch_time_seconds = updated.watch_time_seconds,
                "video completed"
            );
        }

        Ok(ProgressState::from_record(&updated, just_completed))
    }
}
