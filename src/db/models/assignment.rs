use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::{Validate, ValidationError};

use crate::db::models::track::read_only;
use crate::db::port::{DbResult, Entity, FieldValue};
use crate::db::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "assignment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    NotStarted,
    InProgress,
    Completed,
    Expired,
}

impl AssignmentStatus {
    pub const PG_TYPE: &'static str = "assignment_status";

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::NotStarted => "not_started",
            AssignmentStatus::InProgress => "in_progress",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Expired => "expired",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AssignmentStatus::NotStarted | AssignmentStatus::InProgress
        )
    }
}

impl From<AssignmentStatus> for FieldValue {
    fn from(status: AssignmentStatus) -> Self {
        FieldValue::Enum {
            pg_type: AssignmentStatus::PG_TYPE,
            value: status.as_str(),
        }
    }
}

impl FromStr for AssignmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(AssignmentStatus::NotStarted),
            "in_progress" => Ok(AssignmentStatus::InProgress),
            "completed" => Ok(AssignmentStatus::Completed),
            "expired" => Ok(AssignmentStatus::Expired),
            _ => Err(format!("Unknown assignment status: {}", s)),
        }
    }
}

/// A track assigned either to one user or to a whole department.
/// `status` is only changed by explicit writes or a manual sync.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub track_id: Uuid,
    pub user_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub due_date: OffsetDateTime,
    pub status: AssignmentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "single_assignee"))]
pub struct NewAssignment {
    pub track_id: Uuid,
    pub user_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub due_date: OffsetDateTime,
}

fn single_assignee(new: &NewAssignment) -> Result<(), ValidationError> {
    match (new.user_id, new.department_id) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        _ => Err(ValidationError::new(
            "assignment needs exactly one of user_id or department_id",
        )),
    }
}

impl Assignment {
    pub fn new(new: NewAssignment, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            track_id: new.track_id,
            user_id: new.user_id,
            department_id: new.department_id,
            start_date: new.start_date,
            due_date: new.due_date,
            status: AssignmentStatus::NotStarted,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Assignment {
    const NAME: &'static str = "assignment";
    const TABLE: &'static str = "assignments";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "track_id",
        "user_id",
        "department_id",
        "start_date",
        "due_date",
        "status",
        "created_at",
        "updated_at",
    ];

    fn id(&self) -> Uuid {
        self.id
    }

    fn field(&self, column: &str) -> FieldValue {
        match column {
            "id" => self.id.into(),
            "track_id" => self.track_id.into(),
            "user_id" => self.user_id.into(),
            "department_id" => self.department_id.into(),
            "start_date" => self.start_date.into(),
            "due_date" => self.due_date.into(),
            "status" => self.status.into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => FieldValue::Null,
        }
    }

    fn set_field(&mut self, column: &str, value: FieldValue) -> DbResult<()> {
        match column {
            "start_date" => self.start_date = value.into_timestamp(column)?,
            "due_date" => self.due_date = value.into_timestamp(column)?,
            "status" => {
                self.status = value
                    .into_enum(column)?
                    .parse()
                    .map_err(DatabaseError::InvalidInput)?
            }
            "updated_at" => self.updated_at = value.into_timestamp(column)?,
            _ => return Err(read_only(column)),
        }
        Ok(())
    }
}
