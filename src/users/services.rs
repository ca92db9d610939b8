use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::{
    auth::password::{hash_password, verify_password},
    config::AdminBootstrap,
    error::{AppError, AppResult},
    pagination::{PageRequest, Paginated},
    users::{
        dto::{CreateUserRequest, UpdateUserRequest},
        filter::UserFilter,
        repo::{UserRepository, DUPLICATE_USERNAME},
        repo_types::{NewUser, Role, User, UserPatch},
    },
};

/// Current time truncated to the microsecond precision of `TIMESTAMPTZ`.
fn now_micros() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_microsecond(now.microsecond()).unwrap_or(now)
}

/// Business rules for users on top of a [`UserRepository`].
#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    pub async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        self.repo.find_by_username(username).await
    }

    pub async fn find_by_id(&self, id: i64) -> AppResult<Option<User>> {
        self.repo.find_by_id(id).await
    }

    /// Hashes the password and applies `amount = 0` / `role = MEMBER`
    /// when the request leaves them out.
    pub async fn create(&self, dto: CreateUserRequest) -> AppResult<User> {
        let password_hash = hash_password(&dto.password)?;
        let user = self
            .repo
            .insert(NewUser {
                first_name: dto.first_name,
                last_name: dto.last_name,
                username: dto.username,
                address: dto.address,
                password_hash,
                amount: dto.amount.unwrap_or(0),
                role: dto.role.unwrap_or_default(),
                email: dto.email,
                phone: dto.phone,
                created_at: now_micros(),
            })
            .await?;

        info!(user_id = user.id, username = %user.username, role = %user.role, "user created");
        Ok(user)
    }

    /// Applies the provided fields to user `id`; the rest stay as stored.
    pub async fn update(&self, id: i64, dto: UpdateUserRequest) -> AppResult<User> {
        if let Some(username) = dto.username.as_deref() {
            if let Some(other) = self.repo.find_by_username(username).await? {
                if other.id != id {
                    return Err(AppError::Conflict(DUPLICATE_USERNAME.into()));
                }
            }
        }

        let password_hash = dto.password.as_deref().map(hash_password).transpose()?;
        let patch = UserPatch {
            first_name: dto.first_name,
            last_name: dto.last_name,
            username: dto.username,
            address: dto.address,
            password_hash,
            amount: dto.amount,
            role: dto.role,
            email: dto.email,
            phone: dto.phone,
            touched_at: now_micros(),
        };

        let saved = self.repo.update(id, &patch).await?;
        info!(user_id = saved.id, "user updated");
        Ok(saved)
    }

    /// Deletes the user unless sale orders reference it; returns its last state.
    pub async fn delete_by_id(&self, id: i64) -> AppResult<User> {
        let deleted = self.repo.delete_unless_ordered(id).await?;
        info!(user_id = id, username = %deleted.username, "user deleted");
        Ok(deleted)
    }

    pub async fn get_list(&self, page: PageRequest, filter: UserFilter) -> AppResult<Paginated<User>> {
        let total = self.repo.count(&filter).await?;
        let items = self.repo.list(&filter, page.limit(), page.offset()).await?;
        Ok(Paginated {
            items,
            total,
            request: page,
        })
    }

    /// Checks login credentials.
    pub async fn authenticate(&self, username: &str, password: &str) -> AppResult<User> {
        let invalid = || AppError::Unauthorized("Invalid credentials".into());

        let Some(user) = self.repo.find_by_username(username).await? else {
            warn!(username, "login unknown username");
            return Err(invalid());
        };

        if !verify_password(password, &user.password)? {
            warn!(username, user_id = user.id, "login invalid password");
            return Err(invalid());
        }
        Ok(user)
    }

    /// Creates the configured administrator unless the username is taken.
    pub async fn ensure_admin(&self, admin: &AdminBootstrap) -> AppResult<Option<User>> {
        if self.repo.find_by_username(&admin.username).await?.is_some() {
            info!(username = %admin.username, "admin account already present");
            return Ok(None);
        }

        let user = self
            .repo
            .insert(NewUser {
                first_name: admin.first_name.clone(),
                last_name: admin.last_name.clone(),
                username: admin.username.clone(),
                address: "-".into(),
                password_hash: hash_password(&admin.password)?,
                amount: 0,
                role: Role::Admin,
                email: admin.email.clone(),
                phone: "-".into(),
                created_at: now_micros(),
            })
            .await?;
        info!(user_id = user.id, username = %user.username, "admin account created");
        Ok(Some(user))
    }
}
