use axum::Router;

use crate::state::AppState;

pub mod authorizer;
pub mod claims;
pub mod dto;
pub mod handlers;
pub mod jwt;
pub mod password;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
