use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;

use crate::db::models::track::read_only;
use crate::db::port::{DbResult, Entity, FieldValue, Filter};

/// Completion credential, unique per (user, track).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Certificate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub track_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub issue_date: OffsetDateTime,
    pub downloaded: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub download_date: Option<OffsetDateTime>,
}

impl Certificate {
    pub fn new(user_id: Uuid, track_id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            track_id,
            issue_date: now,
            downloaded: false,
            download_date: None,
        }
    }

    pub fn key(user_id: Uuid, track_id: Uuid) -> Filter {
        Filter::new().eq("user_id", user_id).eq("track_id", track_id)
    }
}

impl Entity for Certificate {
    const NAME: &'static str = "certificate";
    const TABLE: &'static str = "certificates";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "user_id",
        "track_id",
        "issue_date",
        "downloaded",
        "download_date",
    ];

    fn id(&self) -> Uuid {
        self.id
    }

    fn field(&self, column: &str) -> FieldValue {
        match column {
            "id" => self.id.into(),
            "user_id" => self.user_id.into(),
            "track_id" => self.track_id.into(),
            "issue_date" => self.issue_date.into(),
            "downloaded" => self.downloaded.into(),
            "download_date" => self.download_date.into(),
            _ => FieldValue::Null,
        }
    }

    fn set_field(&mut self, column: &str, value: FieldValue) -> DbResult<()> {
        match column {
            "downloaded" => self.downloaded = value.into_bool(column)?,
            "download_date" => self.download_date = value.into_opt_timestamp(column)?,
            _ => return Err(read_only(column)),
        }
        Ok(())
    }

    fn unique_key(&self) -> Option<Filter> {
        Some(Certificate::key(self.user_id, self.track_id))
    }
}
