use axum::{
    routing::{get, post, put},
    Router,
};

use crate::app_state::AppState;

use super::handlers::{
    attempt_history, create_question, replace_answers, submit_attempt, track_questions,
};

pub fn assessment_routes() -> Router<AppState> {
    Router::new()
        .route("/quiz/questions", post(create_question))
        .route("/quiz/questions/{question_id}/answers", put(replace_answers))
        .route("/quiz/tracks/{track_id}/questions", get(track_questions))
        .route("/quiz/attempts", post(submit_attempt))
        .route("/quiz/attempts/{user_id}/{question_id}", get(attempt_history))
}
