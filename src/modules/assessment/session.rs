//! Quiz session state machine.
//!
//! ```text
//! Idle -> QuestionPresented -> AnswerSelected -> Submitted -> (QuestionPresented | Completed)
//! ```
//!
//! The session does no I/O. The engine scores the selection, persists the
//! attempt and only then marks the question as submitted, so a failed write
//! leaves the learner on the same question with the same selection.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::{QuizAnswer, QuizQuestion};
use crate::error::{AppError, AppResult};

use super::scoring::ScoredAnswer;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionQuestion {
    pub question: QuizQuestion,
    pub answers: Vec<QuizAnswer>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    QuestionPresented {
        index: usize,
        presented_at: OffsetDateTime,
    },
    AnswerSelected {
        index: usize,
        presented_at: OffsetDateTime,
        answer_id: Uuid,
    },
    Submitted {
        index: usize,
    },
    Completed,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::QuestionPresented { .. } => "question_presented",
            SessionState::AnswerSelected { .. } => "answer_selected",
            SessionState::Submitted { .. } => "submitted",
            SessionState::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuizSummary {
    pub total_score: i64,
    pub correct_count: usize,
    pub question_count: usize,
    pub average_response_time: f64,
}

#[derive(Debug, Clone)]
pub struct QuizSession {
    user_id: Uuid,
    track_id: Uuid,
    questions: Vec<SessionQuestion>,
    state: SessionState,
    results: Vec<ScoredAnswer>,
}

impl QuizSession {
    pub fn new(user_id: Uuid, track_id: Uuid, questions: Vec<SessionQuestion>) -> Self {
        Self {
            user_id,
            track_id,
            questions,
            state: SessionState::Idle,
            results: Vec::new(),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn track_id(&self) -> Uuid {
        self.track_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn results(&self) -> &[ScoredAnswer] {
        &self.results
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// Moves to the next question, or to `Completed` when none is left
    /// (returning `None`).
    pub fn present_next(&mut self, now: OffsetDateTime) -> AppResult<Option<&SessionQuestion>> {
        let next = match self.state {
            SessionState::Idle => 0,
            SessionState::Submitted { index } => index + 1,
            ref other => return Err(invalid_transition(other, "present the next question")),
        };

        if next >= self.questions.len() {
            self.state = SessionState::Completed;
            return Ok(None);
        }

        self.state = SessionState::QuestionPresented {
            index: next,
            presented_at: now,
        };
        Ok(self.questions.get(next))
    }

    /// Selects (or changes) the answer for the presented question.
    pub fn select_answer(&mut self, answer_id: Uuid) -> AppResult<()> {
        let (index, presented_at) = match self.state {
            SessionState::QuestionPresented {
                index,
                presented_at,
            }
            | SessionState::AnswerSelected {
                index,
                presented_at,
                ..
            } => (index, presented_at),
            ref other => return Err(invalid_transition(other, "select an answer")),
        };

        let belongs = self.questions[index]
            .answers
            .iter()
            .any(|answer| answer.id == answer_id);
        if !belongs {
            return Err(AppError::Validation(format!(
                "answer {} does not belong to the presented question",
                answer_id
            )));
        }

        self.state = SessionState::AnswerSelected {
            index,
            presented_at,
            answer_id,
        };
        Ok(())
    }

    /// Scores the current selection without changing state.
    pub fn score_selection(&self, now: OffsetDateTime) -> AppResult<ScoredAnswer> {
        let (index, presented_at, answer_id) = match self.state {
            SessionState::AnswerSelected {
                index,
                presented_at,
                answer_id,
            } => (index, presented_at, answer_id),
            SessionState::QuestionPresented { .. } => {
                return Err(AppError::Validation(
                    "cannot submit without a selected answer".to_string(),
                ))
            }
            ref other => return Err(invalid_transition(other, "submit")),
        };

        let current = &self.questions[index];
        let answer = current
            .answers
            .iter()
            .find(|answer| answer.id == answer_id)
            .ok_or_else(|| AppError::Validation("selected answer is no longer available".into()))?;
        let response_time = (now - presented_at).as_seconds_f64().max(0.0);

        Ok(ScoredAnswer::new(
            current.question.id,
            answer.id,
            answer.is_correct,
            response_time,
            current.question.time_limit_seconds,
        ))
    }

    /// Records a persisted result and moves to `Submitted`.
    pub fn mark_submitted(&mut self, result: ScoredAnswer) -> AppResult<()> {
        match self.state {
            SessionState::AnswerSelected { index, .. } => {
                self.results.push(result);
                self.state = SessionState::Submitted { index };
                Ok(())
            }
            ref other => Err(invalid_transition(other, "mark as submitted")),
        }
    }

    pub fn summary(&self) -> QuizSummary {
        let question_count = self.questions.len();
        let total_score = self.results.iter().map(|r| r.score).sum();
        let correct_count = self.results.iter().filter(|r| r.is_correct).count();
        let total_response: f64 = self.results.iter().map(|r| r.response_time_seconds).sum();
        let average_response_time = if question_count == 0 {
            0.0
        } else {
            total_response / question_count as f64
        };

        QuizSummary {
            total_score,
            correct_count,
            question_count,
            average_response_time,
        }
    }
}

fn invalid_transition(state: &SessionState, action: &str) -> AppError {
    AppError::InvalidState(format!("cannot {} while {}", action, state.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn question(time_limit_seconds: i64) -> SessionQuestion {
        let question = QuizQuestion {
            id: Uuid::new_v4(),
            track_id: Uuid::nil(),
            text: "Where is the assembly point?".to_string(),
            time_limit_seconds,
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let answers = vec![
            QuizAnswer {
                id: Uuid::new_v4(),
                question_id: question.id,
                text: "Parking lot".to_string(),
                is_correct: true,
            },
            QuizAnswer {
                id: Uuid::new_v4(),
                question_id: question.id,
                text: "Roof".to_string(),
                is_correct: false,
            },
        ];
        SessionQuestion { question, answers }
    }

    fn correct(q: &SessionQuestion) -> Uuid {
        q.answers.iter().find(|a| a.is_correct).map(|a| a.id).unwrap()
    }

    fn wrong(q: &SessionQuestion) -> Uuid {
        q.answers.iter().find(|a| !a.is_correct).map(|a| a.id).unwrap()
    }

    #[test]
    fn walks_through_every_state() {
        let questions = vec![question(60), question(60)];
        let mut session = QuizSession::new(Uuid::new_v4(), Uuid::new_v4(), questions.clone());
        let t0 = OffsetDateTime::UNIX_EPOCH;
        assert_eq!(session.state(), &SessionState::Idle);

        session.present_next(t0).unwrap();
        session.select_answer(correct(&questions[0])).unwrap();
        let first = session.score_selection(t0).unwrap();
        assert_eq!(first.score, 150);
        session.mark_submitted(first).unwrap();

        let next = session.present_next(t0 + Duration::seconds(1)).unwrap();
        assert!(next.is_some());
        session.select_answer(wrong(&questions[1])).unwrap();
        let second = session
            .score_selection(t0 + Duration::seconds(11))
            .unwrap();
        assert_eq!(second.score, 0);
        assert_eq!(second.response_time_seconds, 10.0);
        session.mark_submitted(second).unwrap();

        assert!(session.present_next(t0).unwrap().is_none());
        assert!(session.is_completed());

        let summary = session.summary();
        assert_eq!(summary.total_score, 150);
        assert_eq!(summary.correct_count, 1);
        assert_eq!(summary.question_count, 2);
        assert_eq!(summary.average_response_time, 5.0);
    }

    #[test]
    fn submit_without_selection_is_rejected() {
        let mut session = QuizSession::new(Uuid::new_v4(), Uuid::new_v4(), vec![question(60)]);
        session.present_next(OffsetDateTime::UNIX_EPOCH).unwrap();

        let err = session.score_selection(OffsetDateTime::UNIX_EPOCH).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(session.results().is_empty());
    }

    #[test]
    fn foreign_answer_is_rejected() {
        let mut session = QuizSession::new(Uuid::new_v4(), Uuid::new_v4(), vec![question(60)]);
        session.present_next(OffsetDateTime::UNIX_EPOCH).unwrap();
        assert!(session.select_answer(Uuid::new_v4()).is_err());
    }

    #[test]
    fn selection_can_change_before_submit() {
        let questions = vec![question(60)];
        let mut session = QuizSession::new(Uuid::new_v4(), Uuid::new_v4(), questions.clone());
        session.present_next(OffsetDateTime::UNIX_EPOCH).unwrap();
        session.select_answer(wrong(&questions[0])).unwrap();
        session.select_answer(correct(&questions[0])).unwrap();

        let result = session.score_selection(OffsetDateTime::UNIX_EPOCH).unwrap();
        assert!(result.is_correct);
    }

    #[test]
    fn empty_quiz_completes_immediately() {
        let mut session = QuizSession::new(Uuid::new_v4(), Uuid::new_v4(), Vec::new());
        assert!(session.present_next(OffsetDateTime::UNIX_EPOCH).unwrap().is_none());
        assert_eq!(session.summary().average_response_time, 0.0);
    }

    #[test]
    fn out_of_order_calls_are_invalid_state() {
        let mut session = QuizSession::new(Uuid::new_v4(), Uuid::new_v4(), vec![question(60)]);
        assert!(matches!(
            session.select_answer(Uuid::new_v4()),
            Err(AppError::InvalidState(_))
        ));
        session.present_next(OffsetDateTime::UNIX_EPOCH).unwrap();
        assert!(matches!(
            session.present_next(OffsetDateTime::UNIX_EPOCH),
            Err(AppError::InvalidState(_))
        ));
    }
}
