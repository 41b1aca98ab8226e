use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            LoginRequest, LogoutRequest, MessageResponse, OAuthCallbackQuery, PerformResetRequest,
            RefreshRequest, RefreshResponse, ResetFormQuery, ResetRequest, SetPasswordRequest,
            SignupRequest, SignupResponse, VerifyEmailRequest,
        },
        jwt::TokenPair,
        oauth::Provider,
    },
    error::{AppError, AppResult},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/verify-email", post(verify_email))
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token))
        .route("/logout", post(logout))
        .route("/request-password-reset", post(request_password_reset))
        .route("/reset-password", get(reset_form).post(reset_password))
        .route("/set-password", post(set_password))
}

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/:provider", get(oauth_start))
        .route("/auth/:provider/callback", get(oauth_callback))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    let email = payload.email.trim().to_lowercase();
    state.auth.verify_email(payload.into()).await?;
    Ok(Json(MessageResponse::new(format!(
        "Verification code sent to {email}. Please verify your account to complete registration."
    ))))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<SignupResponse>)> {
    let profile = payload.profile(&state.config.social_defaults);
    let (user, message) = if state.config.require_email_verification {
        let code = payload.verification_code.as_deref().unwrap_or_default();
        let user = state.auth.signup(&payload.email, code, profile).await?;
        (user, "User verified and created successfully")
    } else {
        let user = state
            .auth
            .signup_direct(payload.registration(), profile)
            .await?;
        (user, "User created successfully")
    };
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: message.to_string(),
            user: user.into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<TokenPair>> {
    let pair = state.auth.login(&payload.email, &payload.password).await?;
    Ok(Json(pair))
}

#[instrument(skip(state, payload))]
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<RefreshResponse>> {
    let session_token = state
        .auth
        .refresh(payload.refresh_token.as_deref())
        .await?;
    Ok(Json(RefreshResponse { session_token }))
}

#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<LogoutRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .auth
        .logout(
            payload.session_token.as_deref(),
            payload.refresh_token.as_deref(),
        )
        .await?;
    Ok(Json(MessageResponse::new("Logged out successfully")))
}

#[instrument(skip(state, payload))]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<ResetRequest>,
) -> AppResult<Json<MessageResponse>> {
    state.auth.request_reset(&payload.email).await?;
    Ok(Json(MessageResponse::new(format!(
        "Password reset code sent to {}",
        payload.email.trim().to_lowercase()
    ))))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Landing page for the emailed reset link.
pub async fn reset_form(Query(query): Query<ResetFormQuery>) -> AppResult<Html<String>> {
    let token = query
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Token is missing".into()))?;
    let token = escape_html(&token);
    Ok(Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"><title>Reset password</title></head>
<body>
  <h2>Reset your password</h2>
  <form id="reset">
    <input type="hidden" name="token" value="{token}">
    <label>New password <input type="password" name="newPassword" minlength="8" required></label>
    <button type="submit">Reset password</button>
  </form>
  <p id="result"></p>
  <script>
    document.getElementById("reset").addEventListener("submit", async (e) => {{
      e.preventDefault();
      const form = new FormData(e.target);
      const res = await fetch("/reset-password", {{
        method: "POST",
        headers: {{ "Content-Type": "application/json" }},
        body: JSON.stringify({{ token: form.get("token"), newPassword: form.get("newPassword") }})
      }});
      const body = await res.json();
      document.getElementById("result").textContent = body.message;
    }});
  </script>
</body>
</html>"#
    )))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<PerformResetRequest>,
) -> AppResult<Json<MessageResponse>> {
    match payload.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => {
            state
                .auth
                .perform_reset_with_token(token, &payload.new_password)
                .await?
        }
        None => {
            state
                .auth
                .perform_reset(
                    payload.email.as_deref().unwrap_or_default(),
                    payload.reset_code.as_deref().unwrap_or_default(),
                    &payload.new_password,
                )
                .await?
        }
    }
    Ok(Json(MessageResponse::new("Password has been successfully reset")))
}

#[instrument(skip(state, payload))]
pub async fn set_password(
    State(state): State<AppState>,
    Json(payload): Json<SetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .auth
        .set_password(&payload.email, &payload.temp_password, &payload.password)
        .await?;
    Ok(Json(MessageResponse::new("Password successfully set!")))
}

fn provider_from_path(name: &str) -> AppResult<Provider> {
    Provider::parse(name).ok_or_else(|| AppError::NotFound(format!("Unknown provider {name}")))
}

#[instrument(skip(state))]
pub async fn oauth_start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> AppResult<Redirect> {
    let provider = provider_from_path(&provider)?;
    let url = state.auth.begin_oauth(provider).await?;
    Ok(Redirect::to(&url))
}

/// Returns the token pair on success. Client-side failures (bad state,
/// rejected code, email already registered) send the browser to the
/// configured failure page instead.
#[instrument(skip(state, query))]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
) -> AppResult<Response> {
    let provider = provider_from_path(&provider)?;
    let failure = Redirect::to(&state.config.oauth.failure_redirect);
    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        warn!(%provider, "oauth callback without code or state");
        return Ok(failure.into_response());
    };

    match state.auth.complete_oauth(provider, &code, &oauth_state).await {
        Ok(pair) => {
            info!(%provider, "social login completed");
            Ok(Json(pair).into_response())
        }
        Err(e) if e.status().is_server_error() => Err(e),
        Err(e) => {
            warn!(%provider, error = %e, "social login failed");
            Ok(failure.into_response())
        }
    }
}
