use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use super::dto::{CalculateRequest, CalculateResponse, HistoryResponse};
use super::repo::NewBmiRecord;
use super::services::{category, compute_bmi};
use crate::{
    auth::extractors::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bmi/calculate", post(calculate))
        .route("/bmi/history", get(history))
}

#[instrument(skip(state, payload))]
pub async fn calculate(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CalculateRequest>,
) -> AppResult<Json<CalculateResponse>> {
    let user = state
        .users
        .find_by_id(user_id)
        .await
        .map_err(AppError::db)?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    let m = payload.validate()?;

    let bmi = compute_bmi(m.height, m.weight, m.unit);
    let category = category(bmi, user.age, &user.gender, &user.country);

    state
        .users
        .update_measurements(user_id, m.height, m.weight)
        .await
        .map_err(AppError::db)?;
    state
        .bmi
        .insert(NewBmiRecord {
            user_id,
            bmi,
            calculation_unit: m.unit.as_str().to_string(),
            category: category.to_string(),
            height: m.height,
            weight: m.weight,
        })
        .await
        .map_err(AppError::db)?;

    info!(user_id = %user_id, bmi, category, "bmi recorded");
    Ok(Json(CalculateResponse {
        bmi,
        category: category.to_string(),
    }))
}

#[instrument(skip(state))]
pub async fn history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<HistoryResponse>> {
    let records = state
        .bmi
        .list_by_user(user_id)
        .await
        .map_err(AppError::db)?;
    Ok(Json(HistoryResponse { records }))
}
