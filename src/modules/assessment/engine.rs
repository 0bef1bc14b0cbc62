use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::db::{
    Filter, ListQuery, NewQuizQuestion, QuizAnswer, QuizAttempt, QuizQuestion,
    ReplaceQuizAnswers, Sort, Store, Track,
};
use crate::error::{AppError, AppResult};

use super::scoring::ScoredAnswer;
use super::session::{QuizSession, SessionQuestion};

/// Authoring view of a question, correctness included.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionWithAnswers {
    #[serde(flatten)]
    pub question: QuizQuestion,
    pub answers: Vec<QuizAnswer>,
}

/// Learner view of a question. Which answer is correct is never sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresentedQuestion {
    pub id: Uuid,
    pub text: String,
    pub time_limit_seconds: i64,
    pub answers: Vec<PresentedAnswer>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresentedAnswer {
    pub id: Uuid,
    pub text: String,
}

impl From<&SessionQuestion> for PresentedQuestion {
    fn from(item: &SessionQuestion) -> Self {
        Self {
            id: item.question.id,
            text: item.question.text.clone(),
            time_limit_seconds: item.question.time_limit_seconds,
            answers: item
                .answers
                .iter()
                .map(|answer| PresentedAnswer {
                    id: answer.id,
                    text: answer.text.clone(),
                })
                .collect(),
        }
    }
}

pub struct AssessmentEngine {
    tracks: Arc<dyn Store<Track>>,
    questions: Arc<dyn Store<QuizQuestion>>,
    answers: Arc<dyn Store<QuizAnswer>>,
    attempts: Arc<dyn Store<QuizAttempt>>,
    clock: Arc<dyn Clock>,
}

impl AssessmentEngine {
    pub fn new(
        tracks: Arc<dyn Store<Track>>,
        questions: Arc<dyn Store<QuizQuestion>>,
        answers: Arc<dyn Store<QuizAnswer>>,
        attempts: Arc<dyn Store<QuizAttempt>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tracks,
            questions,
            answers,
            attempts,
            clock,
        }
    }

    pub async fn create_question(&self, new: NewQuizQuestion) -> AppResult<QuestionWithAnswers> {
        new.validate()?;
        self.tracks
            .get_by_id(new.track_id)
            .await
            .map_err(AppError::from_lookup("track", new.track_id))?;

        let question = self
            .questions
            .create(QuizQuestion::new(&new, self.clock.now()))
            .await?;

        let mut answers = Vec::with_capacity(new.answers.len());
        for answer in &new.answers {
            match self.answers.create(QuizAnswer::new(question.id, answer)).await {
                Ok(created) => answers.push(created),
                Err(err) => {
                    // Do not leave a question behind without its correct answer.
                    self.discard_question(&question, &answers).await;
                    return Err(err.into());
                }
            }
        }

        info!(question_id = %question.id, track_id = %question.track_id, "quiz question created");
        Ok(QuestionWithAnswers { question, answers })
    }

    async fn discard_answers(&self, answers: &[QuizAnswer]) {
        for answer in answers {
            if let Err(err) = self.answers.delete(answer.id).await {
                warn!(answer_id = %answer.id, error = %err, "failed to discard quiz answer");
            }
        }
    }

    async fn discard_question(&self, question: &QuizQuestion, answers: &[QuizAnswer]) {
        self.discard_answers(answers).await;
        if let Err(err) = self.questions.delete(question.id).await {
            warn!(question_id = %question.id, error = %err, "failed to discard quiz question");
        }
    }

    /// Swaps the full answer set of a question. Past attempts keep pointing
    /// at the answer ids they were scored against.
    pub async fn replace_answers(
        &self,
        question_id: Uuid,
        replacement: ReplaceQuizAnswers,
    ) -> AppResult<QuestionWithAnswers> {
        replacement.validate()?;
        let question = self
            .questions
            .get_by_id(question_id)
            .await
            .map_err(AppError::from_lookup("quiz question", question_id))?;

        let previous = self.answers_for(&[question_id]).await?;

        // The old set stays in place until the whole new set is stored.
        let mut answers = Vec::with_capacity(replacement.answers.len());
        for answer in &replacement.answers {
            match self.answers.create(QuizAnswer::new(question_id, answer)).await {
                Ok(created) => answers.push(created),
                Err(err) => {
                    self.discard_answers(&answers).await;
                    return Err(err.into());
                }
            }
        }

        for existing in previous {
            self.answers.delete(existing.id).await?;
        }

        info!(%question_id, answers = answers.len(), "quiz answers replaced");
        Ok(QuestionWithAnswers { question, answers })
    }

    async fn answers_for(&self, question_ids: &[Uuid]) -> AppResult<Vec<QuizAnswer>> {
        if question_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = ListQuery::filtered(
            Filter::new().one_of("question_id", question_ids.iter().copied()),
        );
        Ok(self.answers.list(&query).await?.rows)
    }

    /// Questions of a track in authoring order, each with its answers. The
    /// answers of all questions are fetched in one call.
    pub async fn track_questions(&self, track_id: Uuid) -> AppResult<Vec<SessionQuestion>> {
        let query = ListQuery::filtered(Filter::new().eq("track_id", track_id))
            .sorted(Sort::asc("created_at"));
        let questions = self.questions.list(&query).await?.rows;
        let ids: Vec<Uuid> = questions.iter().map(|q| q.id).collect();

        let mut by_question: HashMap<Uuid, Vec<QuizAnswer>> = HashMap::new();
        for answer in self.answers_for(&ids).await? {
            by_question.entry(answer.question_id).or_default().push(answer);
        }

        Ok(questions
            .into_iter()
            .map(|question| SessionQuestion {
                answers: by_question.remove(&question.id).unwrap_or_default(),
                question,
            })
            .collect())
    }

    pub async fn presented_questions(&self, track_id: Uuid) -> AppResult<Vec<PresentedQuestion>> {
        Ok(self
            .track_questions(track_id)
            .await?
            .iter()
            .map(PresentedQuestion::from)
            .collect())
    }

    pub async fn start_session(&self, user_id: Uuid, track_id: Uuid) -> AppResult<QuizSession> {
        self.tracks
            .get_by_id(track_id)
            .await
            .map_err(AppError::from_lookup("track", track_id))?;
        let questions = self.track_questions(track_id).await?;
        Ok(QuizSession::new(user_id, track_id, questions))
    }

    /// Presents the next question, stamping the presentation time.
    pub fn present_next(&self, session: &mut QuizSession) -> AppResult<Option<PresentedQuestion>> {
        Ok(session
            .present_next(self.clock.now())?
            .map(PresentedQuestion::from))
    }

    /// Scores the selected answer, appends the attempt and advances the
    /// session. A failed write leaves the session on the same selection.
    pub async fn submit(&self, session: &mut QuizSession) -> AppResult<QuizAttempt> {
        let now = self.clock.now();
        let scored = session.score_selection(now)?;
        let attempt = self
            .attempts
            .create(attempt_row(session.user_id(), &scored, now))
            .await?;
        session.mark_submitted(scored)?;

        info!(
            user_id = %attempt.user_id,
            question_id = %attempt.question_id,
            score = attempt.score,
            "quiz answer submitted"
        );
        Ok(attempt)
    }

    /// Stateless submission where the client measured the response time.
    pub async fn record_attempt(
        &self,
        user_id: Uuid,
        question_id: Uuid,
        answer_id: Option<Uuid>,
        response_time_seconds: f64,
    ) -> AppResult<QuizAttempt> {
        let Some(answer_id) = answer_id else {
            return Err(AppError::Validation(
                "cannot submit without a selected answer".to_string(),
            ));
        };
        if !response_time_seconds.is_finite() || response_time_seconds < 0.0 {
            return Err(AppError::Validation(
                "response time must be a non-negative number".to_string(),
            ));
        }

        let question = self
            .questions
            .get_by_id(question_id)
            .await
            .map_err(AppError::from_lookup("quiz question", question_id))?;
        let answer = self
            .answers
            .get_by_id(answer_id)
            .await
            .map_err(AppError::from_lookup("quiz answer", answer_id))?;
        if answer.question_id != question.id {
            return Err(AppError::Validation(format!(
                "answer {} does not belong to question {}",
                answer_id, question_id
            )));
        }

        let scored = ScoredAnswer::new(
            question.id,
            answer.id,
            answer.is_correct,
            response_time_seconds,
            question.time_limit_seconds,
        );
        let attempt = self
            .attempts
            .create(attempt_row(user_id, &scored, self.clock.now()))
            .await?;

        info!(%user_id, %question_id, score = attempt.score, "quiz attempt recorded");
        Ok(attempt)
    }

    /// Every attempt of a user on a question, oldest first.
    pub async fn attempt_history(&self, user_id: Uuid, question_id: Uuid) -> AppResult<Vec<QuizAttempt>> {
        let query = ListQuery::filtered(
            Filter::new()
                .eq("user_id", user_id)
                .eq("question_id", question_id),
        )
        .sorted(Sort::asc("created_at"));
        Ok(self.attempts.list(&query).await?.rows)
    }
}

fn attempt_row(user_id: Uuid, scored: &ScoredAnswer, now: OffsetDateTime) -> QuizAttempt {
    QuizAttempt {
        id: Uuid::new_v4(),
        user_id,
        question_id: scored.question_id,
        answer_id: scored.answer_id,
        response_time_seconds: scored.response_time_seconds,
        is_correct: scored.is_correct,
        score: scored.score,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{MemoryStore, NewQuizAnswer, NewTrack};
    use time::Duration;

    struct Fixture {
        engine: AssessmentEngine,
        clock: Arc<ManualClock>,
        questions: Arc<MemoryStore<QuizQuestion>>,
        answers: Arc<MemoryStore<QuizAnswer>>,
        attempts: Arc<MemoryStore<QuizAttempt>>,
        track: Track,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let tracks = Arc::new(MemoryStore::<Track>::new());
        let questions = Arc::new(MemoryStore::new());
        let answers = Arc::new(MemoryStore::new());
        let attempts = Arc::new(MemoryStore::new());
        let track = tracks
            .create(Track::new(
                NewTrack {
                    name: "Fire safety".to_string(),
                    description: None,
                },
                clock.now(),
            ))
            .await
            .unwrap();
        let engine = AssessmentEngine::new(
            tracks,
            questions.clone(),
            answers.clone(),
            attempts.clone(),
            clock.clone(),
        );
        Fixture {
            engine,
            clock,
            questions,
            answers,
            attempts,
            track,
        }
    }

    fn new_question(track_id: Uuid, correct: usize) -> NewQuizQuestion {
        NewQuizQuestion {
            track_id,
            text: "Which extinguisher for electrical fires?".to_string(),
            time_limit_seconds: 60,
            answers: ["CO2", "Water", "Foam"]
                .iter()
                .enumerate()
                .map(|(i, text)| NewQuizAnswer {
                    text: text.to_string(),
                    is_correct: i == correct,
                })
                .collect(),
        }
    }

    fn correct_answer(q: &QuestionWithAnswers) -> Uuid {
        q.answers.iter().find(|a| a.is_correct).unwrap().id
    }

    #[tokio::test]
    async fn invalid_question_is_not_persisted() {
        let f = fixture().await;
        let mut bad = new_question(f.track.id, 0);
        bad.answers[1].is_correct = true;

        let err = f.engine.create_question(bad).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(f.questions.is_empty().await);
        assert!(f.answers.is_empty().await);
    }

    #[tokio::test]
    async fn question_for_unknown_track_is_not_found() {
        let f = fixture().await;
        let err = f
            .engine
            .create_question(new_question(Uuid::new_v4(), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn failed_answer_insert_rolls_the_question_back() {
        let f = fixture().await;
        f.answers.fail_next_writes(1);

        let err = f
            .engine
            .create_question(new_question(f.track.id, 0))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(f.questions.is_empty().await);
    }

    #[tokio::test]
    async fn every_submission_appends_an_attempt() {
        let f = fixture().await;
        let q = f.engine.create_question(new_question(f.track.id, 0)).await.unwrap();
        let user = Uuid::new_v4();

        let first = f
            .engine
            .record_attempt(user, q.question.id, Some(correct_answer(&q)), 0.0)
            .await
            .unwrap();
        let second = f
            .engine
            .record_attempt(user, q.question.id, Some(correct_answer(&q)), 30.0)
            .await
            .unwrap();

        assert_eq!(first.score, 150);
        assert_eq!(second.score, 100);
        let history = f.engine.attempt_history(user, q.question.id).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn attempt_without_answer_is_rejected_and_not_stored() {
        let f = fixture().await;
        let q = f.engine.create_question(new_question(f.track.id, 0)).await.unwrap();

        let err = f
            .engine
            .record_attempt(Uuid::new_v4(), q.question.id, None, 3.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(f.attempts.is_empty().await);
    }

    #[tokio::test]
    async fn answer_from_another_question_is_rejected() {
        let f = fixture().await;
        let q1 = f.engine.create_question(new_question(f.track.id, 0)).await.unwrap();
        let q2 = f.engine.create_question(new_question(f.track.id, 1)).await.unwrap();

        let err = f
            .engine
            .record_attempt(Uuid::new_v4(), q1.question.id, Some(correct_answer(&q2)), 3.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn replace_answers_swaps_the_set() {
        let f = fixture().await;
        let q = f.engine.create_question(new_question(f.track.id, 0)).await.unwrap();

        let replaced = f
            .engine
            .replace_answers(
                q.question.id,
                ReplaceQuizAnswers {
                    answers: vec![
                        NewQuizAnswer {
                            text: "Powder".to_string(),
                            is_correct: true,
                        },
                        NewQuizAnswer {
                            text: "Sand".to_string(),
                            is_correct: false,
                        },
                    ],
                },
            )
            .await
            .unwrap();

        assert_eq!(replaced.answers.len(), 2);
        assert_eq!(f.answers.len().await, 2);
    }

    fn replacement(texts: &[&str]) -> ReplaceQuizAnswers {
        ReplaceQuizAnswers {
            answers: texts
                .iter()
                .enumerate()
                .map(|(i, text)| NewQuizAnswer {
                    text: text.to_string(),
                    is_correct: i == 0,
                })
                .collect(),
        }
    }

    async fn stored_answers(f: &Fixture, question_id: Uuid) -> Vec<QuizAnswer> {
        f.engine.answers_for(&[question_id]).await.unwrap()
    }

    #[tokio::test]
    async fn failed_replacement_keeps_the_previous_answers() {
        let f = fixture().await;
        let q = f.engine.create_question(new_question(f.track.id, 0)).await.unwrap();
        f.answers.fail_next_writes(1);

        let err = f
            .engine
            .replace_answers(q.question.id, replacement(&["Powder"]))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let kept = stored_answers(&f, q.question.id).await;
        assert_eq!(kept.len(), 3);
        assert_eq!(kept.iter().filter(|a| a.is_correct).count(), 1);
        assert!(kept.iter().any(|a| a.id == correct_answer(&q)));
    }

    #[tokio::test]
    async fn partial_replacement_is_rolled_back() {
        let f = fixture().await;
        let q = f.engine.create_question(new_question(f.track.id, 0)).await.unwrap();
        f.answers.fail_writes_after(1, 1);

        f.engine
            .replace_answers(q.question.id, replacement(&["Powder", "Sand"]))
            .await
            .unwrap_err();

        let kept = stored_answers(&f, q.question.id).await;
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|a| a.text != "Powder"));
        assert_eq!(kept.iter().filter(|a| a.is_correct).count(), 1);
    }

    #[tokio::test]
    async fn session_scores_with_the_clock() {
        let f = fixture().await;
        let q = f.engine.create_question(new_question(f.track.id, 0)).await.unwrap();
        let user = Uuid::new_v4();

        let mut session = f.engine.start_session(user, f.track.id).await.unwrap();
        let presented = f.engine.present_next(&mut session).unwrap().unwrap();
        assert_eq!(presented.answers.len(), 3);

        f.clock.advance(Duration::seconds(15));
        session.select_answer(correct_answer(&q)).unwrap();
        let attempt = f.engine.submit(&mut session).await.unwrap();
        assert_eq!(attempt.score, 125);
        assert_eq!(attempt.response_time_seconds, 15.0);

        assert!(f.engine.present_next(&mut session).unwrap().is_none());
        let summary = session.summary();
        assert_eq!(summary.total_score, 125);
        assert_eq!(summary.correct_count, 1);
    }

    #[tokio::test]
    async fn failed_submit_keeps_the_selection() {
        let f = fixture().await;
        let q = f.engine.create_question(new_question(f.track.id, 0)).await.unwrap();
        let mut session = f.engine.start_session(Uuid::new_v4(), f.track.id).await.unwrap();
        f.engine.present_next(&mut session).unwrap();
        session.select_answer(correct_answer(&q)).unwrap();

        f.attempts.fail_next_writes(1);
        assert!(f.engine.submit(&mut session).await.is_err());
        assert!(session.results().is_empty());

        let attempt = f.engine.submit(&mut session).await.unwrap();
        assert!(attempt.is_correct);
        assert_eq!(f.attempts.len().await, 1);
    }
}
