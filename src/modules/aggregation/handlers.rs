use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::{Assignment, Page};
use crate::error::AppResult;

use super::service::{
    AssignmentQuery, AssignmentStats, AssignmentView, DepartmentUserCount, TrackProgress,
    UserAssignment,
};

pub async fn track_progress(
    State(state): State<AppState>,
    Path((track_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<TrackProgress>> {
    Ok(Json(state.aggregation.track_progress(user_id, track_id).await?))
}

pub async fn user_assignments(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<UserAssignment>>> {
    Ok(Json(state.aggregation.user_assignments(user_id).await?))
}

pub async fn list_assignments(
    State(state): State<AppState>,
    Query(query): Query<AssignmentQuery>,
) -> AppResult<Json<Page<AssignmentView>>> {
    Ok(Json(state.aggregation.assignments_with_context(&query).await?))
}

pub async fn assignment_stats(State(state): State<AppState>) -> AppResult<Json<AssignmentStats>> {
    Ok(Json(state.aggregation.assignment_stats().await?))
}

pub async fn sync_assignment(
    State(state): State<AppState>,
    Path(assignment_id): Path<Uuid>,
) -> AppResult<Json<Assignment>> {
    Ok(Json(
        state
            .aggregation
            .sync_assignment_status(assignment_id)
            .await?,
    ))
}

pub async fn department_user_counts(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<DepartmentUserCount>>> {
    Ok(Json(state.aggregation.department_user_counts().await?))
}
