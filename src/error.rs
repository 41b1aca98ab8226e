use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::{auth::jwt::TokenError, cache::CacheError, email::QueueError};

pub type AppResult<T> = Result<T, AppError>;

/// Every failure a handler can surface. Status codes are decided in one place,
/// in `IntoResponse`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Verification data expired or invalid")]
    VerificationMissing,

    #[error("Incorrect verification code")]
    CodeMismatch,

    #[error("Refresh token is required")]
    RefreshTokenRequired,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Error logging out")]
    LogoutError,

    #[error("Invalid or expired reset code")]
    InvalidOrExpiredCode,

    #[error("New password cannot be the same as old password")]
    SamePassword,

    #[error("This user has already set their preferred password")]
    PasswordAlreadySet,

    #[error("Invalid temporary password")]
    InvalidTempPassword,

    #[error("You cannot use your temporary password as your actual password")]
    TempPasswordReuse,

    #[error("Your temporary password has expired, a new one has been sent to your email")]
    TempPasswordReissued,

    #[error("This email is already associated with an existing account")]
    SocialAccountExists,

    #[error("Missing Authorization header")]
    MissingAuthHeader,

    #[error("No token, authorization denied")]
    MissingToken,

    #[error("Token is not valid")]
    TokenInvalid,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Session has been superseded by a newer login")]
    SessionSuperseded,

    #[error("dependency failure: {0}")]
    Dependency(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidCredentials
            | AppError::RefreshTokenRequired
            | AppError::MissingAuthHeader
            | AppError::MissingToken
            | AppError::TokenInvalid
            | AppError::TokenExpired
            | AppError::SessionSuperseded => StatusCode::UNAUTHORIZED,
            AppError::InvalidRefreshToken => StatusCode::FORBIDDEN,
            AppError::Dependency(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Wraps a repository failure, logging the cause.
    pub fn db(e: anyhow::Error) -> Self {
        tracing::error!(error = %e, "database operation failed");
        AppError::Dependency(e.to_string())
    }
}

impl From<CacheError> for AppError {
    fn from(e: CacheError) -> Self {
        AppError::Dependency(e.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        AppError::Dependency(e.to_string())
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => AppError::TokenExpired,
            TokenError::Invalid => AppError::TokenInvalid,
            TokenError::Signing(msg) => AppError::Internal(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Dependency(_) => "Service temporarily unavailable".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, %status, "request failed");
        }
        (status, Json(json!({ "message": message }))).into_response()
    }
}
