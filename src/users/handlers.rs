use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        authorizer::{is_admin, require_admin, require_admin_or_self},
        jwt::{AuthUser, MaybeAuthUser},
    },
    error::{AppError, AppResult},
    extractors::{AppJson, UserIdPath},
    pagination::PageRequest,
    response::{paginated, success, ApiResponse, PaginatedResponse},
    state::AppState,
    users::{
        dto::{CreateUserRequest, UpdateUserRequest},
        filter::UserFilter,
        repo::{DUPLICATE_USERNAME, USER_NOT_FOUND},
        repo_types::User,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:user_id",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

/// GET /users?page=&perPage=&<filters> (admin only)
#[instrument(skip(state, params))]
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<PaginatedResponse<User>>> {
    require_admin(&caller)?;

    let page = PageRequest::from_params(&params)?;
    let filter = UserFilter::from_params(&params)?;
    let users = state.users.get_list(page, filter).await?;
    Ok(paginated(users))
}

/// POST /users (open registration)
#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    MaybeAuthUser(caller): MaybeAuthUser,
    AppJson(payload): AppJson<CreateUserRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    let mut payload = payload.normalized()?;

    if !caller.as_ref().is_some_and(is_admin) {
        payload.amount = None;
        payload.role = None;
    }

    if state
        .users
        .find_by_username(&payload.username)
        .await?
        .is_some()
    {
        warn!(username = %payload.username, "username already registered");
        return Err(AppError::Conflict(DUPLICATE_USERNAME.into()));
    }

    let user = state.users.create(payload).await?;
    Ok(success(user))
}

/// GET /users/:user_id (admin or self)
#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    UserIdPath(user_id): UserIdPath,
) -> AppResult<Json<ApiResponse<User>>> {
    require_admin_or_self(&caller, user_id)?;

    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(USER_NOT_FOUND.into()))?;
    Ok(success(user))
}

/// PATCH /users/:user_id (admin or self)
///
/// The body is only decoded once the caller may touch `user_id`, so a
/// foreign id is Forbidden whatever the payload looks like.
#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    UserIdPath(user_id): UserIdPath,
    payload: Result<AppJson<UpdateUserRequest>, AppError>,
) -> AppResult<Json<ApiResponse<User>>> {
    require_admin_or_self(&caller, user_id)?;

    let AppJson(payload) = payload?;
    if payload.touches_privileged_fields() && !is_admin(&caller) {
        warn!(caller_id = caller.id, user_id, "non-admin tried to change amount or role");
        return Err(AppError::Forbidden);
    }

    let saved = state.users.update(user_id, payload.normalized()?).await?;
    Ok(success(saved))
}

/// DELETE /users/:user_id (admin only)
#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    UserIdPath(user_id): UserIdPath,
) -> AppResult<Json<ApiResponse<User>>> {
    require_admin(&caller)?;

    let user = state.users.delete_by_id(user_id).await?;
    info!(caller_id = caller.id, user_id, "delete completed");
    Ok(success(user))
}
