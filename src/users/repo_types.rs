use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, never plaintext
    pub fullname: String,
    pub age: i32,
    pub gender: String,
    pub country: String,
    pub preferred_language: String,
    pub height: f64,
    pub weight: f64,
    pub social_login: bool,    // temp password still pending replacement
    pub is_social_login: bool, // account was created through a provider
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub fullname: String,
    pub age: i32,
    pub gender: String,
    pub country: String,
    pub preferred_language: String,
    pub height: f64,
    pub weight: f64,
    pub social_login: bool,
}

/// Partial profile update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub fullname: Option<String>,
    pub username: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub country: Option<String>,
    pub preferred_language: Option<String>,
}

/// Unique constraint hit on insert or update.
#[derive(Debug, Error)]
#[error("duplicate {0}")]
pub struct DuplicateKey(pub &'static str);

impl DuplicateKey {
    pub fn find(err: &anyhow::Error) -> Option<&DuplicateKey> {
        err.downcast_ref::<DuplicateKey>()
    }
}
