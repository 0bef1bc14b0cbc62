use axum::{extract::State, middleware, routing::get, Json, Router};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    app_state::AppState,
    middleware::tracing::observability_middleware,
    modules::{
        aggregation::aggregation_routes, assessment::assessment_routes,
        credentials::credential_routes, progress::progress_routes,
    },
};

pub fn create_router(state: AppState) -> Router {
    // Certificate verification is called from third-party pages.
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .merge(progress_routes())
        .merge(assessment_routes())
        .merge(aggregation_routes())
        .merge(credential_routes())
        .layer(middleware::from_fn(observability_middleware))
        .layer(cors)
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (storage, database) = match &state.db {
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => ("postgres", "healthy"),
            Err(e) => {
                tracing::warn!(error = %e, "Database health check failed");
                ("postgres", "unhealthy")
            }
        },
        None => ("memory", "healthy"),
    };

    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    Json(json!({
        "status": "ok",
        "timestamp": timestamp,
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "storage": storage,
            "database": database,
        }
    }))
}
