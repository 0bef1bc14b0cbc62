use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::Progress;
use crate::error::{AppError, AppResult};

use super::tracker::ProgressState;

#[derive(Debug, Deserialize)]
pub struct RecordProgressRequest {
    pub user_id: Uuid,
    pub video_id: Uuid,
    pub elapsed_seconds: f64,
}

/// Autosave tick or explicit completion from a player. The duration comes
/// from the stored video, not from the client.
pub async fn record_progress(
    State(state): State<AppState>,
    Json(req): Json<RecordProgressRequest>,
) -> AppResult<Json<ProgressState>> {
    let video = state
        .stores
        .videos
        .get_by_id(req.video_id)
        .await
        .map_err(AppError::from_lookup("video", req.video_id))?;

    let progress = state
        .progress
        .record_progress(req.user_id, video.id, req.elapsed_seconds, video.duration_seconds)
        .await?;
    Ok(Json(progress))
}

pub async fn get_progress(
    State(state): State<AppState>,
    Path((user_id, video_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Progress>> {
    state
        .progress
        .get_progress(user_id, video_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("progress for user {} on video {}", user_id, video_id)))
}
