use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::users::filter::UserFilter;
use crate::users::repo::{UserRepository, DELETE_BLOCKED, DUPLICATE_USERNAME, USER_NOT_FOUND};
use time::Duration as TimeDuration;

use crate::users::repo_types::{NewUser, User, UserPatch};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    users: HashMap<i64, User>,
    // user id -> number of sale orders referencing it
    sale_orders: HashMap<i64, usize>,
}

/// In-memory [`UserRepository`] backing the handler and service tests.
///
/// A single write lock covers each mutation, so the delete guard is atomic
/// with respect to [`InMemoryUserRepository::add_sale_order`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryUserRepository {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sale order owned by `user_id`.
    pub async fn add_sale_order(&self, user_id: i64) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user_id) {
            return Err(AppError::NotFound(USER_NOT_FOUND.into()));
        }
        *inner.sale_orders.entry(user_id).or_default() += 1;
        Ok(())
    }
}

/// Merges `patch` into the stored row the same way the SQL `COALESCE` does.
fn apply_patch(user: &mut User, patch: &UserPatch) {
    let fields = [
        (&mut user.first_name, &patch.first_name),
        (&mut user.last_name, &patch.last_name),
        (&mut user.username, &patch.username),
        (&mut user.address, &patch.address),
        (&mut user.password, &patch.password_hash),
        (&mut user.email, &patch.email),
        (&mut user.phone, &patch.phone),
    ];
    for (slot, value) in fields {
        if let Some(v) = value {
            slot.clone_from(v);
        }
    }
    if let Some(amount) = patch.amount {
        user.amount = amount;
    }
    if let Some(role) = patch.role {
        user.role = role.as_str().to_string();
    }
    user.updated_at = patch
        .touched_at
        .max(user.updated_at + TimeDuration::microseconds(1));
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: i64) -> AppResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.username == username).cloned())
    }

    async fn insert(&self, user: NewUser) -> AppResult<User> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.username == user.username) {
            return Err(AppError::Conflict(DUPLICATE_USERNAME.into()));
        }

        inner.next_id += 1;
        let created = User {
            id: inner.next_id,
            first_name: user.first_name,
            last_name: user.last_name,
            username: user.username,
            address: user.address,
            password: user.password_hash,
            amount: user.amount,
            role: user.role.as_str().to_string(),
            email: user.email,
            phone: user.phone,
            created_at: user.created_at,
            updated_at: user.created_at,
        };
        inner.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(&self, id: i64, patch: &UserPatch) -> AppResult<User> {
        let mut inner = self.inner.write().await;
        if let Some(username) = patch.username.as_deref() {
            if inner
                .users
                .values()
                .any(|u| u.id != id && u.username == username)
            {
                return Err(AppError::Conflict(DUPLICATE_USERNAME.into()));
            }
        }

        let user = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(USER_NOT_FOUND.into()))?;
        apply_patch(user, patch);
        Ok(user.clone())
    }

    async fn delete_unless_ordered(&self, id: i64) -> AppResult<User> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&id) {
            return Err(AppError::NotFound(USER_NOT_FOUND.into()));
        }
        if inner.sale_orders.get(&id).copied().unwrap_or(0) > 0 {
            return Err(AppError::Conflict(DELETE_BLOCKED.into()));
        }
        inner
            .users
            .remove(&id)
            .ok_or_else(|| AppError::NotFound(USER_NOT_FOUND.into()))
    }

    async fn list(&self, filter: &UserFilter, limit: i64, offset: i64) -> AppResult<Vec<User>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<User> = inner
            .users
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect();
        rows.sort_by(|a, b| filter.compare(a, b));

        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, filter: &UserFilter) -> AppResult<i64> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().filter(|u| filter.matches(u)).count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::Role;
    use time::OffsetDateTime;

    fn new_user(username: &str, amount: i64) -> NewUser {
        NewUser {
            first_name: "Test".into(),
            last_name: "User".into(),
            username: username.into(),
            address: "Street 1".into(),
            password_hash: "hash".into(),
            amount,
            role: Role::Member,
            email: format!("{username}@example.com"),
            phone: "555".into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn insert_assigns_sequential_ids() {
        let repo = InMemoryUserRepository::new();
        let a = repo.insert(new_user("a", 0)).await.unwrap();
        let b = repo.insert(new_user("b", 0)).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(a.created_at, a.updated_at);
        assert!(repo.find_by_username("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let repo = InMemoryUserRepository::new();
        repo.insert(new_user("bob", 0)).await.unwrap();
        let err = repo.insert(new_user("bob", 5)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(repo.count(&UserFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_merges_columns_and_rejects_taken_username() {
        let repo = InMemoryUserRepository::new();
        let alice = repo.insert(new_user("alice", 0)).await.unwrap();
        repo.insert(new_user("bob", 0)).await.unwrap();

        let mut patch = UserPatch::new(OffsetDateTime::UNIX_EPOCH);
        patch.amount = Some(42);
        let saved = repo.update(alice.id, &patch).await.unwrap();
        assert_eq!(saved.amount, 42);
        assert_eq!(saved.phone, alice.phone);
        assert_eq!(saved.created_at, alice.created_at);
        assert!(saved.updated_at > alice.updated_at);

        patch.username = Some("bob".into());
        assert!(matches!(repo.update(alice.id, &patch).await, Err(AppError::Conflict(_))));
        let untouched = UserPatch::new(OffsetDateTime::now_utc());
        assert!(matches!(repo.update(99, &untouched).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn interleaved_updates_keep_each_others_columns() {
        let repo = InMemoryUserRepository::new();
        let user = repo.insert(new_user("alice", 0)).await.unwrap();

        let mut phone = UserPatch::new(OffsetDateTime::now_utc());
        phone.phone = Some("phone1".into());
        let mut address = UserPatch::new(OffsetDateTime::now_utc());
        address.address = Some("addr1".into());

        let (a, b) = tokio::join!(repo.update(user.id, &phone), repo.update(user.id, &address));
        a.unwrap();
        b.unwrap();

        let stored = repo.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.phone, "phone1");
        assert_eq!(stored.address, "addr1");
    }

    #[tokio::test]
    async fn delete_is_blocked_by_sale_orders() {
        let repo = InMemoryUserRepository::new();
        let user = repo.insert(new_user("buyer", 0)).await.unwrap();
        repo.add_sale_order(user.id).await.unwrap();

        let err = repo.delete_unless_ordered(user.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == DELETE_BLOCKED));
        assert!(repo.find_by_id(user.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_missing_user_is_not_found() {
        let repo = InMemoryUserRepository::new();
        let err = repo.delete_unless_ordered(99).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_applies_filter_sort_and_window() {
        let repo = InMemoryUserRepository::new();
        for (name, amount) in [("a", 30), ("b", 10), ("c", 20), ("d", 40)] {
            repo.insert(new_user(name, amount)).await.unwrap();
        }
        let params: HashMap<String, String> = [("amount__gte", "20"), ("sort", "amount"), ("order", "desc")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let filter = UserFilter::from_params(&params).unwrap();

        let page = repo.list(&filter, 2, 1).await.unwrap();
        let names: Vec<&str> = page.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(repo.count(&filter).await.unwrap(), 3);
    }
}
