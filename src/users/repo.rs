use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::StoreError;
use crate::users::repo_types::User;

/// Persistence collaborator for users. Shared by all concurrent requests.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts `user` (its `id` is ignored) and returns it with the assigned id.
    async fn insert(&self, user: &User) -> Result<User, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    /// All users, optionally restricted to one country, ordered by id.
    async fn find_all(&self, country: Option<&str>) -> Result<Vec<User>, StoreError>;

    /// Overwrites every column but `id`. `RowNotFound` if the row is gone.
    async fn update(&self, user: &User) -> Result<(), StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: &User) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, first_name, last_name, nickname, country)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, email, password_hash, first_name, last_name, nickname, country
            "#,
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.nickname)
        .bind(&user.country)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, first_name, last_name, nickname, country
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_all(&self, country: Option<&str>) -> Result<Vec<User>, StoreError> {
        // Postgres has no default order; without it rows shuffle after updates
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, first_name, last_name, nickname, country
            FROM users
            WHERE $1::text IS NULL OR country = $1
            ORDER BY id
            "#,
        )
        .bind(country)
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email = $2, password_hash = $3, first_name = $4,
                last_name = $5, nickname = $6, country = $7
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.nickname)
        .bind(&user.country)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
