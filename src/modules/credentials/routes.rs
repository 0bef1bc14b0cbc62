use axum::{
    routing::{get, post},
    Router,
};

use crate::app_state::AppState;

use super::handlers::{
    certificate_artifact, claim_certificate, record_download, revoke_certificate,
    user_certificates, verify_certificate,
};

pub fn credential_routes() -> Router<AppState> {
    Router::new()
        .route("/certificates", post(claim_certificate))
        .route(
            "/certificates/{certificate_id}",
            get(verify_certificate).delete(revoke_certificate),
        )
        .route("/certificates/{certificate_id}/artifact", get(certificate_artifact))
        .route("/certificates/{certificate_id}/download", post(record_download))
        .route("/users/{user_id}/certificates", get(user_certificates))
}
