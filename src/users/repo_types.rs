use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Column list shared by every `SELECT`/`RETURNING` on `users`.
pub(crate) const USER_COLUMNS: &str = "id, first_name, last_name, username, address, password, \
     amount, role, email, phone, created_at, updated_at";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    #[default]
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Member => "MEMBER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "MEMBER" => Ok(Role::Member),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub address: String,
    #[serde(skip_serializing)]
    pub password: String, // argon2 hash, not exposed in JSON
    pub amount: i64,
    pub role: String,
    pub email: String,
    pub phone: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl User {
    /// Unknown stored roles degrade to the least privileged one.
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or_default()
    }
}

/// Row to insert; defaults are already resolved by the service.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub address: String,
    pub password_hash: String,
    pub amount: i64,
    pub role: Role,
    pub email: String,
    pub phone: String,
    pub created_at: OffsetDateTime,
}

/// Column-level changes for one update. `None` keeps the stored value, so
/// concurrent patches touching different columns do not overwrite each other.
#[derive(Debug, Clone)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub address: Option<String>,
    pub password_hash: Option<String>,
    pub amount: Option<i64>,
    pub role: Option<Role>,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Clock reading for `updated_at`; storage bumps it past the stored value.
    pub touched_at: OffsetDateTime,
}

impl UserPatch {
    pub fn new(touched_at: OffsetDateTime) -> Self {
        Self {
            first_name: None,
            last_name: None,
            username: None,
            address: None,
            password_hash: None,
            amount: None,
            role: None,
            email: None,
            phone: None,
            touched_at,
        }
    }
}
