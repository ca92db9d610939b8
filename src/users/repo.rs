use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::users::filter::UserFilter;
use crate::users::repo_types::{NewUser, User, UserPatch, USER_COLUMNS};

pub const DUPLICATE_USERNAME: &str = "User has already exists";
pub const DELETE_BLOCKED: &str = "Delete failed";
pub const USER_NOT_FOUND: &str = "Not found user";

/// Persistence seam for users.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> AppResult<Option<User>>;

    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>>;

    /// Inserts a user; a taken username yields `AppError::Conflict`.
    async fn insert(&self, user: NewUser) -> AppResult<User>;

    /// Applies the provided columns of `patch` in one atomic write; absent
    /// fields keep whatever is stored at that moment.
    async fn update(&self, id: i64, patch: &UserPatch) -> AppResult<User>;

    /// Removes the user atomically unless sale orders still reference it.
    async fn delete_unless_ordered(&self, id: i64) -> AppResult<User>;

    async fn list(&self, filter: &UserFilter, limit: i64, offset: i64) -> AppResult<Vec<User>>;

    async fn count(&self, filter: &UserFilter) -> AppResult<i64>;
}

/// Maps a unique-constraint violation to the duplicate-username conflict.
fn map_unique_violation(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(DUPLICATE_USERNAME.into())
        }
        _ => AppError::Database(err),
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: i64) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn insert(&self, user: NewUser) -> AppResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (first_name, last_name, username, address, password,
                               amount, role, email, phone, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            RETURNING {USER_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, User>(&sql)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.username)
            .bind(&user.address)
            .bind(&user.password_hash)
            .bind(user.amount)
            .bind(user.role.as_str())
            .bind(&user.email)
            .bind(&user.phone)
            .bind(user.created_at)
            .fetch_one(&self.db)
            .await
            .map_err(map_unique_violation)?;
        Ok(created)
    }

    async fn update(&self, id: i64, patch: &UserPatch) -> AppResult<User> {
        let sql = format!(
            r#"
            UPDATE users
               SET first_name = COALESCE($2, first_name),
                   last_name  = COALESCE($3, last_name),
                   username   = COALESCE($4, username),
                   address    = COALESCE($5, address),
                   password   = COALESCE($6, password),
                   amount     = COALESCE($7, amount),
                   role       = COALESCE($8, role),
                   email      = COALESCE($9, email),
                   phone      = COALESCE($10, phone),
                   updated_at = GREATEST($11, updated_at + INTERVAL '1 microsecond')
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(patch.first_name.as_deref())
            .bind(patch.last_name.as_deref())
            .bind(patch.username.as_deref())
            .bind(patch.address.as_deref())
            .bind(patch.password_hash.as_deref())
            .bind(patch.amount)
            .bind(patch.role.map(|r| r.as_str()))
            .bind(patch.email.as_deref())
            .bind(patch.phone.as_deref())
            .bind(patch.touched_at)
            .fetch_optional(&self.db)
            .await
            .map_err(map_unique_violation)?;
        updated.ok_or_else(|| AppError::NotFound(USER_NOT_FOUND.into()))
    }

    async fn delete_unless_ordered(&self, id: i64) -> AppResult<User> {
        // Rolled back on drop if any step below returns early.
        let mut tx = self.db.begin().await?;

        // FOR UPDATE conflicts with the key-share lock a concurrent order
        // insert takes on the referenced user row.
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(USER_NOT_FOUND.into()))?;

        let has_orders: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sale_orders WHERE user_id = $1)")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if has_orders {
            debug!(user_id = id, "delete blocked by sale orders");
            return Err(AppError::Conflict(DELETE_BLOCKED.into()));
        }

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(user_id = id, "user row deleted");
        Ok(user)
    }

    async fn list(&self, filter: &UserFilter, limit: i64, offset: i64) -> AppResult<Vec<User>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        filter.push_where(&mut qb);
        filter.push_order_by(&mut qb);
        qb.push(" LIMIT ").push_bind(limit);
        qb.push(" OFFSET ").push_bind(offset);

        let rows = qb.build_query_as::<User>().fetch_all(&self.db).await?;
        Ok(rows)
    }

    async fn count(&self, filter: &UserFilter) -> AppResult<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        filter.push_where(&mut qb);

        let total: i64 = qb.build_query_scalar().fetch_one(&self.db).await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use time::OffsetDateTime;

    use super::*;
    use crate::users::repo_types::Role;

    fn new_user(username: &str, amount: i64) -> NewUser {
        NewUser {
            first_name: "Test".into(),
            last_name: "User".into(),
            username: username.into(),
            address: "Street 1".into(),
            password_hash: "$argon2id$hash".into(),
            amount,
            role: Role::Member,
            email: format!("{username}@example.com"),
            phone: "555-0000".into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn filter(pairs: &[(&str, &str)]) -> UserFilter {
        let params: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        UserFilter::from_params(&params).unwrap()
    }

    async fn add_order(pool: &PgPool, user_id: i64) {
        sqlx::query("INSERT INTO sale_orders (user_id) VALUES ($1)")
            .bind(user_id)
            .execute(pool)
            .await
            .unwrap();
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn insert_and_lookup_round_trip(pool: PgPool) {
        let repo = PgUserRepository::new(pool);
        let created = repo.insert(new_user("bob", 5)).await.unwrap();
        assert_eq!(created.amount, 5);
        assert_eq!(created.role(), Role::Member);
        assert_eq!(created.created_at, created.updated_at);

        let by_id = repo.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "bob");
        assert_eq!(by_id.password, "$argon2id$hash");
        let by_name = repo.find_by_username("bob").await.unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
        assert!(repo.find_by_id(created.id + 1000).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn duplicate_insert_is_a_conflict(pool: PgPool) {
        let repo = PgUserRepository::new(pool);
        repo.insert(new_user("bob", 0)).await.unwrap();

        let err = repo.insert(new_user("bob", 9)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == DUPLICATE_USERNAME));
        assert_eq!(repo.count(&UserFilter::default()).await.unwrap(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn update_writes_only_given_columns(pool: PgPool) {
        let repo = PgUserRepository::new(pool);
        let user = repo.insert(new_user("alice", 0)).await.unwrap();
        repo.insert(new_user("bob", 0)).await.unwrap();

        let mut phone = UserPatch::new(user.updated_at);
        phone.phone = Some("555-0199".into());
        let mut address = UserPatch::new(user.updated_at);
        address.address = Some("2 Side St".into());
        address.role = Some(Role::Admin);

        repo.update(user.id, &phone).await.unwrap();
        let saved = repo.update(user.id, &address).await.unwrap();
        assert_eq!(saved.phone, "555-0199");
        assert_eq!(saved.address, "2 Side St");
        assert_eq!(saved.role(), Role::Admin);
        assert_eq!(saved.first_name, user.first_name);
        assert_eq!(saved.password, user.password);
        assert_eq!(saved.created_at, user.created_at);
        // a stale clock reading still moves updated_at forward
        assert!(saved.updated_at > user.updated_at);

        let mut taken = UserPatch::new(OffsetDateTime::now_utc());
        taken.username = Some("bob".into());
        assert!(matches!(
            repo.update(user.id, &taken).await,
            Err(AppError::Conflict(_))
        ));

        let missing = UserPatch::new(OffsetDateTime::now_utc());
        assert!(matches!(
            repo.update(user.id + 1000, &missing).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn delete_is_blocked_while_orders_exist(pool: PgPool) {
        let repo = PgUserRepository::new(pool.clone());
        let buyer = repo.insert(new_user("buyer", 0)).await.unwrap();
        let leaver = repo.insert(new_user("leaver", 0)).await.unwrap();
        add_order(&pool, buyer.id).await;

        let err = repo.delete_unless_ordered(buyer.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == DELETE_BLOCKED));
        assert!(repo.find_by_id(buyer.id).await.unwrap().is_some());

        let deleted = repo.delete_unless_ordered(leaver.id).await.unwrap();
        assert_eq!(deleted.username, "leaver");
        assert!(repo.find_by_id(leaver.id).await.unwrap().is_none());

        assert!(matches!(
            repo.delete_unless_ordered(leaver.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn list_and_count_apply_filter_sort_and_window(pool: PgPool) {
        let repo = PgUserRepository::new(pool);
        for (name, amount) in [("a", 30), ("b", 10), ("c", 20), ("d", 40)] {
            repo.insert(new_user(name, amount)).await.unwrap();
        }

        let f = filter(&[("amount__gte", "20"), ("sort", "amount"), ("order", "desc")]);
        let page = repo.list(&f, 2, 1).await.unwrap();
        let names: Vec<&str> = page.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(repo.count(&f).await.unwrap(), 3);

        let f = filter(&[("role", "member"), ("username__ne", "b")]);
        assert_eq!(repo.count(&f).await.unwrap(), 3);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn like_filter_treats_wildcards_literally(pool: PgPool) {
        let repo = PgUserRepository::new(pool);
        repo.insert(new_user("under_score", 0)).await.unwrap();
        repo.insert(new_user("underXscore", 0)).await.unwrap();

        let f = filter(&[("username__like", "R_S")]);
        let rows = repo.list(&f, 10, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].username, "under_score");
    }
}
