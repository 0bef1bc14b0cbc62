use axum::{
    routing::{get, post},
    Router,
};

use crate::app_state::AppState;

use super::handlers::{
    assignment_stats, department_user_counts, list_assignments, sync_assignment, track_progress,
    user_assignments,
};

pub fn aggregation_routes() -> Router<AppState> {
    Router::new()
        .route("/tracks/{track_id}/progress/{user_id}", get(track_progress))
        .route("/users/{user_id}/assignments", get(user_assignments))
        .nest("/admin", admin_routes())
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/assignments", get(list_assignments))
        .route("/assignments/stats", get(assignment_stats))
        .route("/assignments/{assignment_id}/sync", post(sync_assignment))
        .route("/departments/user-counts", get(department_user_counts))
}
