pub mod engine;
pub mod handlers;
pub mod routes;
pub mod scoring;
pub mod session;

pub use engine::{AssessmentEngine, PresentedQuestion, QuestionWithAnswers};
pub use routes::assessment_routes;
pub use scoring::ScoredAnswer;
pub use session::{QuizSession, QuizSummary, SessionState};
