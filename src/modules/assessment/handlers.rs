use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::{NewQuizQuestion, QuizAttempt, ReplaceQuizAnswers};
use crate::error::AppResult;

use super::engine::{PresentedQuestion, QuestionWithAnswers};

#[derive(Debug, Deserialize)]
pub struct SubmitAttemptRequest {
    pub user_id: Uuid,
    pub question_id: Uuid,
    pub answer_id: Option<Uuid>,
    pub response_time_seconds: f64,
}

pub async fn create_question(
    State(state): State<AppState>,
    Json(req): Json<NewQuizQuestion>,
) -> AppResult<(StatusCode, Json<QuestionWithAnswers>)> {
    let question = state.assessment.create_question(req).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

pub async fn replace_answers(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
    Json(req): Json<ReplaceQuizAnswers>,
) -> AppResult<Json<QuestionWithAnswers>> {
    Ok(Json(state.assessment.replace_answers(question_id, req).await?))
}

pub async fn track_questions(
    State(state): State<AppState>,
    Path(track_id): Path<Uuid>,
) -> AppResult<Json<Vec<PresentedQuestion>>> {
    Ok(Json(state.assessment.presented_questions(track_id).await?))
}

/// Scores with the response time reported by the client, which is trusted
/// as sent. Server-timed scoring goes through `QuizSession`.
pub async fn submit_attempt(
    State(state): State<AppState>,
    Json(req): Json<SubmitAttemptRequest>,
) -> AppResult<(StatusCode, Json<QuizAttempt>)> {
    let attempt = state
        .assessment
        .record_attempt(
            req.user_id,
            req.question_id,
            req.answer_id,
            req.response_time_seconds,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(attempt)))
}

pub async fn attempt_history(
    State(state): State<AppState>,
    Path((user_id, question_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Vec<QuizAttempt>>> {
    Ok(Json(
        state
            .assessment
            .attempt_history(user_id, question_id)
            .await?,
    ))
}
