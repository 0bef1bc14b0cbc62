use std::sync::Arc;

use sqlx::PgPool;

use crate::clock::Clock;
use crate::config;
use crate::db::Stores;
use crate::modules::aggregation::AggregationService;
use crate::modules::assessment::AssessmentEngine;
use crate::modules::credentials::CredentialIssuer;
use crate::modules::progress::ProgressTracker;

#[derive(Clone)]
pub struct AppState {
    pub env: config::Config,
    /// Present when running against Postgres.
    pub db: Option<PgPool>,
    pub stores: Stores,
    pub progress: Arc<ProgressTracker>,
    pub assessment: Arc<AssessmentEngine>,
    pub aggregation: Arc<AggregationService>,
    pub credentials: Arc<CredentialIssuer>,
}

impl AppState {
    pub fn new(env: config::Config, db: Option<PgPool>, stores: Stores, clock: Arc<dyn Clock>) -> Self {
        let timeout = env.engine.request_timeout;

        let progress = Arc::new(ProgressTracker::new(stores.progress.clone(), clock.clone()));
        let assessment = Arc::new(AssessmentEngine::new(
            stores.tracks.clone(),
            stores.questions.clone(),
            stores.answers.clone(),
            stores.attempts.clone(),
            clock.clone(),
        ));
        let aggregation = Arc::new(AggregationService::new(stores.clone(), clock.clone(), timeout));
        let credentials = Arc::new(CredentialIssuer::new(
            stores.certificates.clone(),
            stores.users.clone(),
            stores.tracks.clone(),
            aggregation.clone(),
            clock,
            env.engine.public_host.clone(),
            timeout,
        ));

        Self {
            env,
            db,
            stores,
            progress,
            assessment,
            aggregation,
            credentials,
        }
    }
}
