use axum::{
    routing::{get, post},
    Router,
};

use crate::app_state::AppState;

use super::handlers::{get_progress, record_progress};

pub fn progress_routes() -> Router<AppState> {
    Router::new()
        .route("/progress", post(record_progress))
        .route("/progress/{user_id}/{video_id}", get(get_progress))
}
