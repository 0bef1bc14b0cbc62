use serde::Serialize;
use uuid::Uuid;

pub const BASE_SCORE: f64 = 100.0;
pub const MAX_TIME_BONUS: f64 = 50.0;

/// Bonus for a correct answer: 50 at an instant response, decaying linearly
/// to 0 at half the time limit and floored there. Slow answers are never
/// penalised below the base score.
pub fn time_bonus(is_correct: bool, response_time_seconds: f64, time_limit_seconds: i64) -> f64 {
    if !is_correct {
        return 0.0;
    }
    let half_limit = time_limit_seconds as f64 / 2.0;
    if half_limit <= 0.0 {
        return 0.0;
    }
    let response = response_time_seconds.max(0.0);
    (MAX_TIME_BONUS - (response / half_limit) * MAX_TIME_BONUS).max(0.0)
}

/// 100..=150 for a correct answer, 0 otherwise.
pub fn score(is_correct: bool, response_time_seconds: f64, time_limit_seconds: i64) -> i64 {
    if !is_correct {
        return 0;
    }
    (BASE_SCORE + time_bonus(true, response_time_seconds, time_limit_seconds)).round() as i64
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredAnswer {
    pub question_id: Uuid,
    pub answer_id: Uuid,
    pub is_correct: bool,
    pub response_time_seconds: f64,
    pub score: i64,
}

impl ScoredAnswer {
    pub fn new(
        question_id: Uuid,
        answer_id: Uuid,
        is_correct: bool,
        response_time_seconds: f64,
        time_limit_seconds: i64,
    ) -> Self {
        Self {
            question_id,
            answer_id,
            is_correct,
            response_time_seconds,
            score: score(is_correct, response_time_seconds, time_limit_seconds),
        }
    }
}
