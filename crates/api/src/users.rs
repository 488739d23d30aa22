//! Platform user lookups

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use storefront_shared::{Role, User};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{ApiError, ApiResult};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, uid: &str) -> ApiResult<Option<User>>;

    async fn list(&self) -> ApiResult<Vec<User>>;
}

#[derive(Debug, FromRow)]
struct UserRow {
    uid: String,
    email: String,
    role: String,
    is_active: bool,
    is_hidden: bool,
    created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = ApiError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role: Role = row.role.parse().map_err(ApiError::Internal)?;
        Ok(User {
            uid: row.uid,
            email: row.email,
            role,
            is_active: row.is_active,
            is_hidden: row.is_hidden,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get(&self, uid: &str) -> ApiResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT uid, email, role, is_active, is_hidden, created_at
            FROM users
            WHERE uid = $1
            "#,
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn list(&self) -> ApiResult<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            r#"
            SELECT uid, email, role, is_active, is_hidden, created_at
            FROM users
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(User::try_from).collect()
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().map(|u| (u.uid.clone(), u)).collect()),
        }
    }

    pub async fn upsert(&self, user: User) {
        self.users.write().await.insert(user.uid.clone(), user);
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get(&self, uid: &str) -> ApiResult<Option<User>> {
        Ok(self.users.read().await.get(uid).cloned())
    }

    async fn list(&self) -> ApiResult<Vec<User>> {
        Ok(self.users.read().await.values().cloned().collect())
    }
}
