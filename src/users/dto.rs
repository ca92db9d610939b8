use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::users::repo_types::Role;

pub const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn require(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn check_email(email: &str) -> AppResult<()> {
    if !is_valid_email(email) {
        return Err(AppError::Validation("Invalid email".into()));
    }
    Ok(())
}

fn check_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Request body for `POST /api/users`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub username: String,
    pub password: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub role: Option<Role>,
}

impl CreateUserRequest {
    /// Trims identifiers, lowercases the email and checks required fields.
    pub fn normalized(mut self) -> AppResult<Self> {
        self.username = self.username.trim().to_string();
        self.email = self.email.trim().to_lowercase();

        require("firstName", &self.first_name)?;
        require("lastName", &self.last_name)?;
        require("address", &self.address)?;
        require("username", &self.username)?;
        require("email", &self.email)?;
        require("phone", &self.phone)?;
        check_email(&self.email)?;
        check_password(&self.password)?;
        Ok(self)
    }
}

/// Request body for `PATCH /api/users/{id}`; absent fields stay unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub address: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub amount: Option<i64>,
    pub role: Option<Role>,
}

impl UpdateUserRequest {
    pub fn normalized(mut self) -> AppResult<Self> {
        if let Some(username) = self.username.as_mut() {
            *username = username.trim().to_string();
        }
        if let Some(email) = self.email.as_mut() {
            *email = email.trim().to_lowercase();
        }

        let required = [
            ("firstName", &self.first_name),
            ("lastName", &self.last_name),
            ("address", &self.address),
            ("username", &self.username),
            ("email", &self.email),
            ("phone", &self.phone),
        ];
        for (field, value) in required {
            if let Some(v) = value {
                require(field, v)?;
            }
        }
        if let Some(email) = &self.email {
            check_email(email)?;
        }
        if let Some(password) = &self.password {
            check_password(password)?;
        }
        Ok(self)
    }

    /// Balance and role may only be changed by an administrator.
    pub fn touches_privileged_fields(&self) -> bool {
        self.amount.is_some() || self.role.is_some()
    }
}
