use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Sqlx(sqlx::Error),

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record")]
    Duplicate,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Timeouts, dropped connections, exhausted pools. Safe to retry.
    #[error("Transient storage failure: {0}")]
    Transient(String),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

impl DatabaseError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DatabaseError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound)
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                DatabaseError::Transient(err.to_string())
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => DatabaseError::Transient(err.to_string()),
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                DatabaseError::Duplicate
            }
            other => DatabaseError::Sqlx(other),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sqlx_errors() {
        assert!(DatabaseError::from(sqlx::Error::RowNotFound).is_not_found());
        assert!(DatabaseError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!DatabaseError::from(sqlx::Error::ColumnNotFound("x".into())).is_transient());
    }
}
