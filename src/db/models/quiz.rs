use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::{Validate, ValidationError};

use crate::db::models::track::read_only;
use crate::db::port::{DbResult, Entity, FieldValue};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: Uuid,
    pub track_id: Uuid,
    pub text: String,
    pub time_limit_seconds: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct QuizAnswer {
    pub id: Uuid,
    pub question_id: Uuid,
    pub text: String,
    pub is_correct: bool,
}

/// Append-only log entry; one row per submission, never updated.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub user_id: Uuid,
    pub question_id: Uuid,
    pub answer_id: Uuid,
    pub response_time_seconds: f64,
    pub is_correct: bool,
    pub score: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewQuizAnswer {
    #[validate(length(min = 1, message = "answer text must not be empty"))]
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewQuizQuestion {
    pub track_id: Uuid,
    #[validate(length(min = 1, message = "question text must not be empty"))]
    pub text: String,
    #[validate(range(min = 1, message = "time limit must be positive"))]
    pub time_limit_seconds: i64,
    #[validate(nested, custom(function = "exactly_one_correct"))]
    pub answers: Vec<NewQuizAnswer>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReplaceQuizAnswers {
    #[validate(nested, custom(function = "exactly_one_correct"))]
    pub answers: Vec<NewQuizAnswer>,
}

/// Creation/update invariant: every question has exactly one correct answer.
#[allow(clippy::ptr_arg)]
pub fn exactly_one_correct(answers: &Vec<NewQuizAnswer>) -> Result<(), ValidationError> {
    let correct = answers.iter().filter(|a| a.is_correct).count();
    if correct == 1 {
        return Ok(());
    }
    let mut err = ValidationError::new("exactly_one_correct");
    err.message = Some(if correct == 0 {
        "question has no correct answer".into()
    } else {
        "question has more than one correct answer".into()
    });
    Err(err)
}

impl QuizQuestion {
    pub fn new(new: &NewQuizQuestion, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            track_id: new.track_id,
            text: new.text.clone(),
            time_limit_seconds: new.time_limit_seconds,
            created_at: now,
        }
    }
}

impl QuizAnswer {
    pub fn new(question_id: Uuid, new: &NewQuizAnswer) -> Self {
        Self {
            id: Uuid::new_v4(),
            question_id,
            text: new.text.clone(),
            is_correct: new.is_correct,
        }
    }
}

impl Entity for QuizQuestion {
    const NAME: &'static str = "quiz question";
    const TABLE: &'static str = "quiz_questions";
    const COLUMNS: &'static [&'static str] =
        &["id", "track_id", "text", "time_limit_seconds", "created_at"];

    fn id(&self) -> Uuid {
        self.id
    }

    fn field(&self, column: &str) -> FieldValue {
        match column {
            "id" => self.id.into(),
            "track_id" => self.track_id.into(),
            "text" => self.text.as_str().into(),
            "time_limit_seconds" => self.time_limit_seconds.into(),
            "created_at" => self.created_at.into(),
            _ => FieldValue::Null,
        }
    }

    fn set_field(&mut self, column: &str, value: FieldValue) -> DbResult<()> {
        match column {
            "text" => self.text = value.into_text(column)?,
            "time_limit_seconds" => self.time_limit_seconds = value.into_int(column)?,
            _ => return Err(read_only(column)),
        }
        Ok(())
    }
}

impl Entity for QuizAnswer {
    const NAME: &'static str = "quiz answer";
    const TABLE: &'static str = "quiz_answers";
    const COLUMNS: &'static [&'static str] = &["id", "question_id", "text", "is_correct"];

    fn id(&self) -> Uuid {
        self.id
    }

    fn field(&self, column: &str) -> FieldValue {
        match column {
            "id" => self.id.into(),
            "question_id" => self.question_id.into(),
            "text" => self.text.as_str().into(),
            "is_correct" => self.is_correct.into(),
            _ => FieldValue::Null,
        }
    }

    fn set_field(&mut self, column: &str, value: FieldValue) -> DbResult<()> {
        match column {
            "text" => self.text = value.into_text(column)?,
            "is_correct" => self.is_correct = value.into_bool(column)?,
            _ => return Err(read_only(column)),
        }
        Ok(())
    }
}

impl Entity for QuizAttempt {
    const NAME: &'static str = "quiz attempt";
    const TABLE: &'static str = "quiz_attempts";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "user_id",
        "question_id",
        "answer_id",
        "response_time_seconds",
        "is_correct",
        "score",
        "created_at",
    ];

    fn id(&self) -> Uuid {
        self.id
    }

    fn field(&self, column: &str) -> FieldValue {
        match column {
            "id" => self.id.into(),
            "user_id" => self.user_id.into(),
            "question_id" => self.question_id.into(),
            "answer_id" => self.answer_id.into(),
            "response_time_seconds" => self.response_time_seconds.into(),
            "is_correct" => self.is_correct.into(),
            "score" => self.score.into(),
            "created_at" => self.created_at.into(),
            _ => FieldValue::Null,
        }
    }

    fn set_field(&mut self, column: &str, _value: FieldValue) -> DbResult<()> {
        Err(read_only(column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(text: &str, is_correct: bool) -> NewQuizAnswer {
        NewQuizAnswer {
            text: text.to_string(),
            is_correct,
        }
    }

    fn question(answers: Vec<NewQuizAnswer>) -> NewQuizQuestion {
        NewQuizQuestion {
            track_id: Uuid::new_v4(),
            text: "Which extinguisher for electrical fires?".to_string(),
            time_limit_seconds: 60,
            answers,
        }
    }

    #[test]
    fn accepts_single_correct_answer() {
        let q = question(vec![answer("CO2", true), answer("Water", false)]);
        assert!(q.validate().is_ok());
    }

    #[test]
    fn rejects_missing_or_multiple_correct_answers() {
        assert!(question(vec![answer("CO2", false), answer("Water", false)])
            .validate()
            .is_err());
        assert!(question(vec![answer("CO2", true), answer("Powder", true)])
            .validate()
            .is_err());
    }

    #[test]
    fn rejects_empty_answer_text() {
        let q = question(vec![answer("", true), answer("Water", false)]);
        assert!(q.validate().is_err());
    }
}
