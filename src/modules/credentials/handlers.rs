use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::Certificate;
use crate::error::{AppError, AppResult};

use super::issuer::{CertificateArtifact, CertificateSummary};

#[derive(Debug, Deserialize)]
pub struct ClaimCertificateRequest {
    pub user_id: Uuid,
    pub track_id: Uuid,
}

/// 201 for a fresh certificate, 200 when the pair already had one.
pub async fn claim_certificate(
    State(state): State<AppState>,
    Json(req): Json<ClaimCertificateRequest>,
) -> AppResult<(StatusCode, Json<Certificate>)> {
    let issued = state
        .credentials
        .claim_certificate(req.user_id, req.track_id)
        .await?;
    let status = if issued.newly_issued {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(issued.certificate)))
}

fn invalid(reason: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "valid": false, "reason": reason })),
    )
        .into_response()
}

/// Public, unauthenticated verification.
pub async fn verify_certificate(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Response {
    let Ok(certificate_id) = raw_id.parse::<Uuid>() else {
        return invalid("malformed certificate id");
    };

    match state.credentials.verify_certificate(certificate_id).await {
        Ok(view) => Json(view).into_response(),
        Err(AppError::NotFound(_)) => invalid("certificate not found"),
        Err(err) => err.into_response(),
    }
}

pub async fn revoke_certificate(
    State(state): State<AppState>,
    Path(certificate_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.credentials.revoke_certificate(certificate_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn certificate_artifact(
    State(state): State<AppState>,
    Path(certificate_id): Path<Uuid>,
) -> AppResult<Json<CertificateArtifact>> {
    Ok(Json(
        state
            .credentials
            .certificate_artifact(certificate_id)
            .await?,
    ))
}

pub async fn record_download(
    State(state): State<AppState>,
    Path(certificate_id): Path<Uuid>,
) -> AppResult<Json<Certificate>> {
    Ok(Json(state.credentials.record_download(certificate_id).await?))
}

pub async fn user_certificates(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<CertificateSummary>>> {
    Ok(Json(state.credentials.certificates_for_user(user_id).await?))
}
