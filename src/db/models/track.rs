use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::Validate;

use crate::db::port::{DbResult, Entity, FieldValue};

/// Learning path made of ordered videos and optional quiz questions.
/// `video_ids` is the authoritative ordering; a referenced video may have
/// been deleted since, so readers must tolerate dangling ids.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub video_ids: Vec<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Immutable content reference.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Video {
    pub id: Uuid,
    /// Owning track, kept for the cascade on delete. Membership and order
    /// are read from `Track::video_ids`.
    pub track_id: Uuid,
    pub title: String,
    pub duration_seconds: i64,
    pub order_index: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewTrack {
    #[validate(length(min = 1))]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewVideo {
    pub track_id: Uuid,
    #[validate(length(min = 1))]
    pub title: String,
    #[validate(range(min = 1))]
    pub duration_seconds: i64,
}

impl Track {
    pub fn new(new: NewTrack, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            video_ids: Vec::new(),
            created_at: now,
        }
    }
}

impl Video {
    pub fn new(new: NewVideo, order_index: i64, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            track_id: new.track_id,
            title: new.title,
            duration_seconds: new.duration_seconds,
            order_index,
            created_at: now,
        }
    }
}

impl Entity for Track {
    const NAME: &'static str = "track";
    const TABLE: &'static str = "tracks";
    const COLUMNS: &'static [&'static str] =
        &["id", "name", "description", "video_ids", "created_at"];

    fn id(&self) -> Uuid {
        self.id
    }

    fn field(&self, column: &str) -> FieldValue {
        match column {
            "id" => self.id.into(),
            "name" => self.name.as_str().into(),
            "description" => self.description.clone().into(),
            "video_ids" => self.video_ids.clone().into(),
            "created_at" => self.created_at.into(),
            _ => FieldValue::Null,
        }
    }

    fn set_field(&mut self, column: &str, value: FieldValue) -> DbResult<()> {
        match column {
            "name" => self.name = value.into_text(column)?,
            "description" => self.description = value.into_opt_text(column)?,
            "video_ids" => self.video_ids = value.into_uuid_list(column)?,
            _ => return Err(read_only(column)),
        }
        Ok(())
    }
}

impl Entity for Video {
    const NAME: &'static str = "video";
    const TABLE: &'static str = "videos";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "track_id",
        "title",
        "duration_seconds",
        "order_index",
        "created_at",
    ];

    fn id(&self) -> Uuid {
        self.id
    }

    fn field(&self, column: &str) -> FieldValue {
        match column {
            "id" => self.id.into(),
            "track_id" => self.track_id.into(),
            "title" => self.title.as_str().into(),
            "duration_seconds" => self.duration_seconds.into(),
            "order_index" => self.order_index.into(),
            "created_at" => self.created_at.into(),
            _ => FieldValue::Null,
        }
    }

    fn set_field(&mut self, column: &str, value: FieldValue) -> DbResult<()> {
        match column {
            "title" => self.title = value.into_text(column)?,
            "order_index" => self.order_index = value.into_int(column)?,
            _ => return Err(read_only(column)),
        }
        Ok(())
    }
}

pub(crate) fn read_only(column: &str) -> crate::db::DatabaseError {
    crate::db::DatabaseError::InvalidInput(format!("column `{}` cannot be updated", column))
}
