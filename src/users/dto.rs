use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::repo_types::{ProfileChanges, User};
use crate::error::{AppError, AppResult};

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub fullname: String,
    pub username: String,
    pub age: i32,
    pub gender: String,
    pub country: String,
    #[serde(rename = "preferredLanguage")]
    pub preferred_language: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for ProfileResponse {
    fn from(u: User) -> Self {
        Self {
            fullname: u.fullname,
            username: u.username,
            age: u.age,
            gender: u.gender,
            country: u.country,
            preferred_language: u.preferred_language,
            last_updated_at: u.updated_at,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub fullname: Option<String>,
    pub username: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub country: Option<String>,
    pub preferred_language: Option<String>,
}

fn non_empty(field: &str, value: Option<String>) -> AppResult<Option<String>> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if v.is_empty() => Err(AppError::Validation(format!("{field} cannot be empty"))),
        other => Ok(other),
    }
}

impl UpdateProfileRequest {
    pub fn into_changes(self) -> AppResult<ProfileChanges> {
        if let Some(age) = self.age {
            if age <= 0 {
                return Err(AppError::Validation(
                    "Invalid age provided. Age must be a positive number".into(),
                ));
            }
        }
        Ok(ProfileChanges {
            fullname: non_empty("Fullname", self.fullname)?,
            username: non_empty("Username", self.username)?,
            age: self.age,
            gender: non_empty("Gender", self.gender)?,
            country: non_empty("Country", self.country)?,
            preferred_language: non_empty("Preferred language", self.preferred_language)?,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ProfileUpdated {
    pub message: String,
    pub user: ProfileResponse,
}
