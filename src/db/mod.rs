mod error;
mod models;
pub mod port;
mod repositories;

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;

pub use error::DatabaseError;
pub use models::*;
pub use port::{Changes, DbResult, Entity, FieldValue, Filter, ListQuery, Page, Sort, Store};
pub use repositories::{MemoryStore, PgStore};

/// Initialize the database connection pool and apply pending migrations
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections.unwrap_or(10))
        .min_connections(config.min_connections.unwrap_or(1))
        .connect(&config.url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(DatabaseError::from)?;

    Ok(pool)
}

/// One store per entity. Components receive the stores they need instead
/// of reaching for a shared client.
#[derive(Clone)]
pub struct Stores {
    pub tracks: Arc<dyn Store<Track>>,
    pub videos: Arc<dyn Store<Video>>,
    pub progress: Arc<dyn Store<Progress>>,
    pub questions: Arc<dyn Store<QuizQuestion>>,
    pub answers: Arc<dyn Store<QuizAnswer>>,
    pub attempts: Arc<dyn Store<QuizAttempt>>,
    pub assignments: Arc<dyn Store<Assignment>>,
    pub certificates: Arc<dyn Store<Certificate>>,
    pub users: Arc<dyn Store<User>>,
    pub departments: Arc<dyn Store<Department>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            tracks: Arc::new(MemoryStore::new()),
            videos: Arc::new(MemoryStore::new()),
            progress: Arc::new(MemoryStore::new()),
            questions: Arc::new(MemoryStore::new()),
            answers: Arc::new(MemoryStore::new()),
            attempts: Arc::new(MemoryStore::new()),
            assignments: Arc::new(MemoryStore::new()),
            certificates: Arc::new(MemoryStore::new()),
            users: Arc::new(MemoryStore::new()),
            departments: Arc::new(MemoryStore::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            tracks: Arc::new(PgStore::new(pool.clone())),
            videos: Arc::new(PgStore::new(pool.clone())),
            progress: Arc::new(PgStore::new(pool.clone())),
            questions: Arc::new(PgStore::new(pool.clone())),
            answers: Arc::new(PgStore::new(pool.clone())),
            attempts: Arc::new(PgStore::new(pool.clone())),
            assignments: Arc::new(PgStore::new(pool.clone())),
            certificates: Arc::new(PgStore::new(pool.clone())),
            users: Arc::new(PgStore::new(pool.clone())),
            departments: Arc::new(PgStore::new(pool)),
        }
    }
}
