use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use validator::Validate;

use crate::db::models::track::read_only;
use crate::db::port::{DbResult, Entity, FieldValue};

/// Learner record. Authentication lives elsewhere; the engine only needs
/// the display name and the department link.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub department_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewUser {
    #[validate(length(min = 1))]
    pub full_name: String,
    #[validate(email)]
    pub email: String,
    pub department_id: Option<Uuid>,
}

impl User {
    pub fn new(new: NewUser) -> Self {
        Self {
            id: Uuid::new_v4(),
            full_name: new.full_name,
            email: new.email.to_lowercase(),
            department_id: new.department_id,
        }
    }
}

impl Department {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

impl Entity for User {
    const NAME: &'static str = "user";
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &["id", "full_name", "email", "department_id"];

    fn id(&self) -> Uuid {
        self.id
    }

    fn field(&self, column: &str) -> FieldValue {
        match column {
            "id" => self.id.into(),
            "full_name" => self.full_name.as_str().into(),
            "email" => self.email.as_str().into(),
            "department_id" => self.department_id.into(),
            _ => FieldValue::Null,
        }
    }

    fn set_field(&mut self, column: &str, value: FieldValue) -> DbResult<()> {
        match column {
            "full_name" => self.full_name = value.into_text(column)?,
            "email" => self.email = value.into_text(column)?,
            "department_id" => self.department_id = value.into_opt_uuid(column)?,
            _ => return Err(read_only(column)),
        }
        Ok(())
    }
}

impl Entity for Department {
    const NAME: &'static str = "department";
    const TABLE: &'static str = "departments";
    const COLUMNS: &'static [&'static str] = &["id", "name"];

    fn id(&self) -> Uuid {
        self.id
    }

    fn field(&self, column: &str) -> FieldValue {
        match column {
            "id" => self.id.into(),
            "name" => self.name.as_str().into(),
            _ => FieldValue::Null,
        }
    }

    fn set_field(&mut self, column: &str, value: FieldValue) -> DbResult<()> {
        match column {
            "name" => self.name = value.into_text(column)?,
            _ => return Err(read_only(column)),
        }
        Ok(())
    }
}
