use std::sync::Arc;

use axum::extract::FromRef;

use crate::config::AppConfig;
use crate::db;
use crate::users::repo::{PgUserRepository, UserRepository};
use crate::users::services::UserService;

#[derive(Clone)]
pub struct AppState {
    pub users: UserService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let pool = db::connect(&config).await?;
        let state = Self::from_parts(Arc::new(PgUserRepository::new(pool)), config);

        if let Some(admin) = &state.config.admin {
            state.users.ensure_admin(admin).await?;
        }
        Ok(state)
    }

    pub fn from_parts(repo: Arc<dyn UserRepository>, config: Arc<AppConfig>) -> Self {
        Self {
            users: UserService::new(repo),
            config,
        }
    }
}

impl FromRef<AppState> for UserService {
    fn from_ref(state: &AppState) -> Self {
        state.users.clone()
    }
}
