use axum::{extract::State, routing::get, Json, Router};
use tracing::{info, instrument, warn};

use super::dto::{ProfileResponse, ProfileUpdated, UpdateProfileRequest};
use super::repo_types::DuplicateKey;
use crate::{
    auth::{dto::MessageResponse, extractors::AuthUser},
    error::{AppError, AppResult},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/profile",
        get(get_profile).put(update_profile).delete(delete_profile),
    )
}

fn user_not_found() -> AppError {
    AppError::NotFound("User not found".into())
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<ProfileResponse>> {
    let user = state
        .users
        .find_by_id(user_id)
        .await
        .map_err(AppError::db)?
        .ok_or_else(user_not_found)?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<ProfileUpdated>> {
    let changes = payload.into_changes()?;
    let user = state
        .users
        .update_profile(user_id, changes)
        .await
        .map_err(|e| match DuplicateKey::find(&e) {
            Some(_) => {
                warn!(user_id = %user_id, "username already taken");
                AppError::Conflict("Username is already in use.".into())
            }
            None => AppError::db(e),
        })?
        .ok_or_else(user_not_found)?;
    info!(user_id = %user_id, "profile updated");
    Ok(Json(ProfileUpdated {
        message: "Profile updated successfully".into(),
        user: user.into(),
    }))
}

/// Removes the account and its history, then revokes its live tokens.
#[instrument(skip(state))]
pub async fn delete_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<MessageResponse>> {
    let deleted = state.users.delete(user_id).await.map_err(AppError::db)?;
    if !deleted {
        return Err(user_not_found());
    }
    state.auth.revoke_sessions(user_id).await?;
    info!(user_id = %user_id, "account deleted");
    Ok(Json(MessageResponse::new(
        "User profile and account deleted successfully",
    )))
}
