use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;

use crate::db::models::track::read_only;
use crate::db::port::{DbResult, Entity, FieldValue, Filter};
use crate::db::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "progress_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl ProgressStatus {
    pub const PG_TYPE: &'static str = "progress_status";

    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
        }
    }
}

impl From<ProgressStatus> for FieldValue {
    fn from(status: ProgressStatus) -> Self {
        FieldValue::Enum {
            pg_type: ProgressStatus::PG_TYPE,
            value: status.as_str(),
        }
    }
}

impl FromStr for ProgressStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(ProgressStatus::NotStarted),
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            _ => Err(format!("Unknown progress status: {}", s)),
        }
    }
}

/// Watch record for one (user, video) pair.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Progress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub video_id: Uuid,
    pub watch_time_seconds: i64,
    pub status: ProgressStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Progress {
    pub fn new(user_id: Uuid, video_id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            video_id,
            watch_time_seconds: 0,
            status: ProgressStatus::NotStarted,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(user_id: Uuid, video_id: Uuid) -> Filter {
        Filter::new().eq("user_id", user_id).eq("video_id", video_id)
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProgressStatus::Completed
    }
}

impl Entity for Progress {
    const NAME: &'static str = "progress";
    const TABLE: &'static str = "progress";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "user_id",
        "video_id",
        "watch_time_seconds",
        "status",
        "completed_at",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> Uuid {
        self.id
    }

    fn field(&self, column: &str) -> FieldValue {
        match column {
            "id" => self.id.into(),
            "user_id" => self.user_id.into(),
            "video_id" => self.video_id.into(),
            "watch_time_seconds" => self.watch_time_seconds.into(),
            "status" => self.status.into(),
            "completed_at" => self.completed_at.into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => FieldValue::Null,
        }
    }

    fn set_field(&mut self, column: &str, value: FieldValue) -> DbResult<()> {
        match column {
            "watch_time_seconds" => self.watch_time_seconds = value.into_int(column)?,
            "status" => {
                self.status = value
                    .into_enum(column)?
                    .parse()
                    .map_err(DatabaseError::InvalidInput)?
            }
            "completed_at" => self.completed_at = value.into_opt_timestamp(column)?,
            "updated_at" => self.updated_at = value.into_timestamp(column)?,
            _ => return Err(read_only(column)),
        }
        Ok(())
    }

    fn unique_key(&self) -> Option<Filter> {
        Some(Progress::key(self.user_id, self.video_id))
    }
}
