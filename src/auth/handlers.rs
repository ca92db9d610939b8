use axum::{
    extract::{FromRef, State},
    routing::post,
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RefreshRequest},
        jwt::JwtKeys,
    },
    error::{AppError, AppResult},
    extractors::AppJson,
    response::{success, ApiResponse},
    state::AppState,
    users::repo_types::User,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

fn issue_tokens(keys: &JwtKeys, user: User) -> AppResult<AuthResponse> {
    let access_token = keys.sign_access(user.id, user.role())?;
    let refresh_token = keys.sign_refresh(user.id, user.role())?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user,
    })
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Json<ApiResponse<AuthResponse>>> {
    let username = payload.username.trim();
    if username.is_empty() || payload.password.is_empty() {
        return Err(AppError::Validation(
            "username and password are required".into(),
        ));
    }

    let user = state.users.authenticate(username, &payload.password).await?;
    let keys = JwtKeys::from_ref(&state);

    info!(user_id = user.id, username = %user.username, "user logged in");
    Ok(success(issue_tokens(&keys, user)?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RefreshRequest>,
) -> AppResult<Json<ApiResponse<AuthResponse>>> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&payload.refresh_token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        AppError::Unauthorized("Invalid refresh token".into())
    })?;

    let user_id = claims
        .user_id()
        .ok_or_else(|| AppError::Unauthorized("Invalid refresh token".into()))?;

    // Re-read the user so the new pair carries the current role.
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".into()))?;

    Ok(success(issue_tokens(&keys, user)?))
}
