use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::services::{ProfileFields, Registration};
use crate::config::SocialDefaults;
use crate::users::repo_types::User;

/// Request body for the first signup step.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEmailRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub fullname: String,
    #[serde(default)]
    pub username: String,
}

impl From<VerifyEmailRequest> for Registration {
    fn from(r: VerifyEmailRequest) -> Self {
        Registration {
            email: r.email,
            password: r.password,
            fullname: r.fullname,
            username: r.username,
        }
    }
}

/// Request body for `/signup`. With verification on, `verificationCode`
/// completes a pending registration; with it off, the credential fields are
/// read directly.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub verification_code: Option<String>,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub fullname: String,
    #[serde(default)]
    pub username: String,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub country: Option<String>,
    pub preferred_language: Option<String>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
}

impl SignupRequest {
    /// Missing profile values fall back to the configured defaults.
    pub fn profile(&self, defaults: &SocialDefaults) -> ProfileFields {
        ProfileFields {
            age: self.age.unwrap_or(defaults.age),
            gender: self.gender.clone().unwrap_or_else(|| defaults.gender.clone()),
            country: self.country.clone().unwrap_or_else(|| defaults.country.clone()),
            preferred_language: self
                .preferred_language
                .clone()
                .unwrap_or_else(|| defaults.preferred_language.clone()),
            height: self.height.unwrap_or(0.0),
            weight: self.weight.unwrap_or(0.0),
        }
    }

    pub fn registration(&self) -> Registration {
        Registration {
            email: self.email.clone(),
            password: self.password.clone(),
            fullname: self.fullname.clone(),
            username: self.username.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub session_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub session_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub email: String,
}

/// Either the code variant (`email` + `resetCode`) or the link variant
/// (`token`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformResetRequest {
    pub email: Option<String>,
    pub reset_code: Option<String>,
    pub token: Option<String>,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetFormQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPasswordRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub temp_password: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub fullname: String,
    pub age: i32,
    pub gender: String,
    pub country: String,
    pub preferred_language: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            username: u.username,
            fullname: u.fullname,
            age: u.age,
            gender: u.gender,
            country: u.country,
            preferred_language: u.preferred_language,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub message: String,
    pub user: PublicUser,
}
