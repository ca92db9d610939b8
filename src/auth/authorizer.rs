//! Capability checks called at the top of each guarded handler.
//!
//! A failed check yields [`AppError::Forbidden`] before any lookup runs, so
//! the response never reveals whether the target user exists.

use crate::error::{AppError, AppResult};
use crate::users::repo_types::Role;

/// Authenticated identity taken from a verified access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: i64,
    pub role: Role,
}

pub fn is_admin(caller: &Caller) -> bool {
    caller.role == Role::Admin
}

pub fn is_self(caller: &Caller, target_id: i64) -> bool {
    caller.id == target_id
}

pub fn require_admin(caller: &Caller) -> AppResult<()> {
    if is_admin(caller) {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

pub fn require_admin_or_self(caller: &Caller, target_id: i64) -> AppResult<()> {
    if is_admin(caller) || is_self(caller, target_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
