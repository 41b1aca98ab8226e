use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Identity of a request carrying the caller's live session token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AppError::MissingAuthHeader)?;
        let value = header.to_str().map_err(|_| AppError::MissingToken)?;

        // Expect "Bearer <token>"
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::MissingToken)?;

        let user_id = state.auth.authenticate(token).await.map_err(|e| {
            warn!(error = %e, "session rejected");
            e
        })?;
        Ok(AuthUser(user_id))
    }
}
