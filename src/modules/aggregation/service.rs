use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{
    Assignment, AssignmentStatus, Changes, DbResult, Department, Entity, Filter, ListQuery,
    Page, Progress, ProgressStatus, Sort, Store, Stores, Track, User, Video,
};
use crate::error::{AppError, AppResult};

use super::batch::{bounded, retry_once, stitch, unique_ids, BatchLoader};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoProgress {
    pub video_id: Uuid,
    pub title: String,
    pub order_index: i64,
    pub duration_seconds: i64,
    pub watch_time_seconds: i64,
    pub status: ProgressStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackProgress {
    pub track_id: Uuid,
    pub user_id: Uuid,
    pub total_video_count: usize,
    pub completed_video_count: usize,
    pub progress_percentage: f64,
    /// In track order; videos that no longer exist are left out.
    pub videos: Vec<VideoProgress>,
}

impl TrackProgress {
    pub fn is_complete(&self) -> bool {
        self.total_video_count > 0 && self.completed_video_count == self.total_video_count
    }

    fn has_started(&self) -> bool {
        self.videos
            .iter()
            .any(|video| video.status != ProgressStatus::NotStarted)
    }
}

pub fn percentage(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    completed as f64 / total as f64 * 100.0
}

type ProgressIndex = HashMap<(Uuid, Uuid), Progress>;

fn summarize(
    user_id: Uuid,
    track: &Track,
    videos: &HashMap<Uuid, Video>,
    progress: &ProgressIndex,
) -> TrackProgress {
    let details: Vec<VideoProgress> = unique_ids(track.video_ids.iter().copied())
        .into_iter()
        .filter_map(|id| videos.get(&id))
        .map(|video| {
            let record = progress.get(&(user_id, video.id));
            VideoProgress {
                video_id: video.id,
                title: video.title.clone(),
                order_index: video.order_index,
                duration_seconds: video.duration_seconds,
                watch_time_seconds: record.map_or(0, |p| p.watch_time_seconds),
                status: record.map_or(ProgressStatus::NotStarted, |p| p.status),
                completed_at: record.and_then(|p| p.completed_at),
            }
        })
        .collect();

    let completed = details
        .iter()
        .filter(|video| video.status == ProgressStatus::Completed)
        .count();

    TrackProgress {
        track_id: track.id,
        user_id,
        total_video_count: details.len(),
        completed_video_count: completed,
        progress_percentage: percentage(completed, details.len()),
        videos: details,
    }
}

/// Status a manual sync moves an assignment to. `completed` is terminal;
/// otherwise it is derived from the learners' progress and the due date.
pub fn next_status(
    current: AssignmentStatus,
    learners: &[TrackProgress],
    due_date: OffsetDateTime,
    now: OffsetDateTime,
) -> AssignmentStatus {
    if current == AssignmentStatus::Completed {
        return current;
    }
    if !learners.is_empty() && learners.iter().all(TrackProgress::is_complete) {
        return AssignmentStatus::Completed;
    }
    if now > due_date {
        return AssignmentStatus::Expired;
    }
    if learners.iter().any(TrackProgress::has_started) {
        AssignmentStatus::InProgress
    } else {
        AssignmentStatus::NotStarted
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssignmentStats {
    pub total: u64,
    pub completed: u64,
    pub active: u64,
    pub expired: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentUserCount {
    pub department_id: Uuid,
    pub name: String,
    pub user_count: u64,
}

/// Admin list filters. `search` is matched against the stitched names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignmentQuery {
    pub status: Option<AssignmentStatus>,
    pub track_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl AssignmentQuery {
    fn filter(&self) -> Filter {
        let mut filter = Filter::new();
        if let Some(status) = self.status {
            filter = filter.eq("status", status);
        }
        if let Some(track_id) = self.track_id {
            filter = filter.eq("track_id", track_id);
        }
        if let Some(user_id) = self.user_id {
            filter = filter.eq("user_id", user_id);
        }
        if let Some(department_id) = self.department_id {
            filter = filter.eq("department_id", department_id);
        }
        filter
    }

    fn needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    fn page(&self) -> (u32, u32) {
        (
            self.page.unwrap_or(1).max(1),
            self.page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        )
    }
}

/// Assignment with the names of what it points at. A name is `None` when
/// the referenced row is gone or could not be read in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentView {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub track_name: Option<String>,
    pub department_name: Option<String>,
    pub user_full_name: Option<String>,
}

impl AssignmentView {
    fn matches(&self, needle: &str) -> bool {
        [&self.track_name, &self.department_name, &self.user_full_name]
            .into_iter()
            .flatten()
            .any(|name| name.to_lowercase().contains(needle))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserAssignment {
    #[serde(flatten)]
    pub view: AssignmentView,
    pub progress_percentage: f64,
}

/// Derived statistics over independently fetched entities.
pub struct AggregationService {
    stores: Stores,
    clock: Arc<dyn Clock>,
    read_timeout: Duration,
}

impl AggregationService {
    pub fn new(stores: Stores, clock: Arc<dyn Clock>, read_timeout: Duration) -> Self {
        Self {
            stores,
            clock,
            read_timeout,
        }
    }

    async fn read<T, F, Fut>(&self, read: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        bounded(self.read_timeout, retry_once(read)).await
    }

    fn loader<E: Entity>(&self, store: &Arc<dyn Store<E>>) -> BatchLoader<E> {
        BatchLoader::new(store.clone(), self.read_timeout)
    }

    async fn load_progress(&self, user_ids: &[Uuid], video_ids: &[Uuid]) -> AppResult<ProgressIndex> {
        if user_ids.is_empty() || video_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = ListQuery::filtered(
            Filter::new()
                .one_of("user_id", user_ids.iter().copied())
                .one_of("video_id", video_ids.iter().copied()),
        );
        let rows = self.read(|| self.stores.progress.list(&query)).await?.rows;
        Ok(rows
            .into_iter()
            .map(|row| ((row.user_id, row.video_id), row))
            .collect())
    }

    /// Progress of one user on several tracks, with one video fetch and one
    /// progress fetch for all of them.
    async fn progress_for_tracks(
        &self,
        user_id: Uuid,
        tracks: &[Track],
    ) -> AppResult<HashMap<Uuid, TrackProgress>> {
        let videos = self
            .loader(&self.stores.videos)
            .load(tracks.iter().flat_map(|t| t.video_ids.iter().copied()))
            .await?;
        let video_ids: Vec<Uuid> = videos.keys().copied().collect();
        let progress = self.load_progress(&[user_id], &video_ids).await?;

        Ok(tracks
            .iter()
            .map(|track| (track.id, summarize(user_id, track, &videos, &progress)))
            .collect())
    }

    pub async fn track_progress(&self, user_id: Uuid, track_id: Uuid) -> AppResult<TrackProgress> {
        let track = self
            .read(|| self.stores.tracks.get_by_id(track_id))
            .await
            .map_err(AppError::from_lookup("track", track_id))?;

        self.progress_for_tracks(user_id, std::slice::from_ref(&track))
            .await?
            .remove(&track_id)
            .ok_or_else(|| AppError::InternalServerError("track progress missing".to_string()))
    }

    pub async fn is_track_complete(&self, user_id: Uuid, track_id: Uuid) -> AppResult<bool> {
        Ok(self.track_progress(user_id, track_id).await?.is_complete())
    }

    async fn count_assignments(&self, filter: Filter) -> AppResult<u64> {
        Ok(self.read(|| self.stores.assignments.count(&filter)).await?)
    }

    /// Four independent counts, issued concurrently.
    pub async fn assignment_stats(&self) -> AppResult<AssignmentStats> {
        let (total, completed, active, expired) = futures_util::try_join!(
            self.count_assignments(Filter::new()),
            self.count_assignments(Filter::new().eq("status", AssignmentStatus::Completed)),
            self.count_assignments(Filter::new().one_of(
                "status",
                [AssignmentStatus::NotStarted, AssignmentStatus::InProgress],
            )),
            self.count_assignments(Filter::new().eq("status", AssignmentStatus::Expired)),
        )?;

        Ok(AssignmentStats {
            total,
            completed,
            active,
            expired,
        })
    }

    async fn count_users(&self, department: &Department) -> AppResult<DepartmentUserCount> {
        let filter = Filter::new().eq("department_id", department.id);
        let user_count = self.read(|| self.stores.users.count(&filter)).await?;
        Ok(DepartmentUserCount {
            department_id: department.id,
            name: department.name.clone(),
            user_count,
        })
    }

    /// One count per department.
    pub async fn department_user_counts(&self) -> AppResult<Vec<DepartmentUserCount>> {
        let query = ListQuery::default().sorted(Sort::asc("name"));
        let departments = self.read(|| self.stores.departments.list(&query)).await?.rows;
        debug!(departments = departments.len(), "counting users per department");

        try_join_all(departments.iter().map(|department| self.count_users(department))).await
    }

    async fn stitch_assignments(
        &self,
        rows: Vec<Assignment>,
        tracks: &HashMap<Uuid, Track>,
    ) -> Vec<AssignmentView> {
        let departments = self.loader(&self.stores.departments);
        let users = self.loader(&self.stores.users);
        let (departments, users): (HashMap<Uuid, Department>, HashMap<Uuid, User>) = futures_util::join!(
            departments.load_or_empty(rows.iter().filter_map(|a| a.department_id)),
            users.load_or_empty(rows.iter().filter_map(|a| a.user_id)),
        );

        stitch(rows, tracks, |a| Some(a.track_id))
            .into_iter()
            .map(|(assignment, track)| AssignmentView {
                track_name: track.map(|t| t.name),
                department_name: assignment
                    .department_id
                    .and_then(|id| departments.get(&id))
                    .map(|d| d.name.clone()),
                user_full_name: assignment
                    .user_id
                    .and_then(|id| users.get(&id))
                    .map(|u| u.full_name.clone()),
                assignment,
            })
            .collect()
    }

    /// Admin view. Without a search the storage layer pages; with one, every
    /// filtered row is stitched, searched and paged in memory.
    pub async fn assignments_with_context(
        &self,
        query: &AssignmentQuery,
    ) -> AppResult<Page<AssignmentView>> {
        let (page, page_size) = query.page();
        let base = ListQuery::filtered(query.filter()).sorted(Sort::asc("due_date"));

        let Some(needle) = query.needle() else {
            let paged = base.paged(page, page_size);
            let result = self.read(|| self.stores.assignments.list(&paged)).await?;
            let tracks = self
                .loader(&self.stores.tracks)
                .load_or_empty(result.rows.iter().map(|a| a.track_id))
                .await;
            return Ok(Page {
                rows: self.stitch_assignments(result.rows, &tracks).await,
                total: result.total,
            });
        };

        let all = self.read(|| self.stores.assignments.list(&base)).await?.rows;
        let tracks = self
            .loader(&self.stores.tracks)
            .load_or_empty(all.iter().map(|a| a.track_id))
            .await;
        let matching: Vec<AssignmentView> = self
            .stitch_assignments(all, &tracks)
            .await
            .into_iter()
            .filter(|view| view.matches(&needle))
            .collect();

        let total = matching.len() as u64;
        let offset = (page as usize - 1) * page_size as usize;
        Ok(Page {
            rows: matching
                .into_iter()
                .skip(offset)
                .take(page_size as usize)
                .collect(),
            total,
        })
    }

    /// Assignments that apply to a user, directly or through their
    /// department, each with the user's progress on the track.
    pub async fn user_assignments(&self, user_id: Uuid) -> AppResult<Vec<UserAssignment>> {
        let user = self
            .read(|| self.stores.users.get_by_id(user_id))
            .await
            .map_err(AppError::from_lookup("user", user_id))?;

        let direct = ListQuery::filtered(Filter::new().eq("user_id", user_id));
        let mut rows = self.read(|| self.stores.assignments.list(&direct)).await?.rows;
        if let Some(department_id) = user.department_id {
            let inherited = ListQuery::filtered(Filter::new().eq("department_id", department_id));
            rows.extend(self.read(|| self.stores.assignments.list(&inherited)).await?.rows);
        }
        rows.sort_by_key(|a| a.due_date);

        let tracks = self
            .loader(&self.stores.tracks)
            .load(rows.iter().map(|a| a.track_id))
            .await?;
        let track_rows: Vec<Track> = tracks.values().cloned().collect();
        let progress = self.progress_for_tracks(user_id, &track_rows).await?;

        Ok(self
            .stitch_assignments(rows, &tracks)
            .await
            .into_iter()
            .map(|view| UserAssignment {
                progress_percentage: progress
                    .get(&view.assignment.track_id)
                    .map_or(0.0, |p| p.progress_percentage),
                view,
            })
            .collect())
    }

    /// Re-derives an assignment's status from progress and due date. A
    /// department assignment completes when every member has finished.
    pub async fn sync_assignment_status(&self, assignment_id: Uuid) -> AppResult<Assignment> {
        let assignment = self
            .read(|| self.stores.assignments.get_by_id(assignment_id))
            .await
            .map_err(AppError::from_lookup("assignment", assignment_id))?;
        if assignment.status == AssignmentStatus::Completed {
            return Ok(assignment);
        }

        let track = self
            .read(|| self.stores.tracks.get_by_id(assignment.track_id))
            .await
            .map_err(AppError::from_lookup("track", assignment.track_id))?;

        let learners: Vec<Uuid> = match (assignment.user_id, assignment.department_id) {
            (Some(user_id), _) => vec![user_id],
            (None, Some(department_id)) => {
                let members = ListQuery::filtered(Filter::new().eq("department_id", department_id));
                self.read(|| self.stores.users.list(&members))
                    .await?
                    .rows
                    .into_iter()
                    .map(|user| user.id)
                    .collect()
            }
            (None, None) => Vec::new(),
        };

        let videos = self
            .loader(&self.stores.videos)
            .load(track.video_ids.iter().copied())
            .await?;
        let video_ids: Vec<Uuid> = videos.keys().copied().collect();
        let progress = self.load_progress(&learners, &video_ids).await?;
        let summaries: Vec<TrackProgress> = learners
            .iter()
            .map(|user_id| summarize(*user_id, &track, &videos, &progress))
            .collect();

        let now = self.clock.now();
        let next = next_status(assignment.status, &summaries, assignment.due_date, now);
        if next == assignment.status {
            return Ok(assignment);
        }

        let changes = Changes::new()
            .latch("status", next, AssignmentStatus::Completed)
            .set("updated_at", now);
        let updated = self.stores.assignments.update(assignment.id, &changes).await?;
        info!(
            %assignment_id,
            from = assignment.status.as_str(),
            to = updated.status.as_str(),
            "assignment status synced"
        );
        Ok(updated)
    }
}
