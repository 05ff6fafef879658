use serde::Serialize;
use sqlx::FromRow;

/// Name of the unique index guarding `users.email`.
pub const EMAIL_UNIQUE_CONSTRAINT: &str = "uix_users_email";

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct User {
    pub id: i64, // 0 until inserted
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, never exposed
    pub first_name: String,
    pub last_name: String,
    pub nickname: String,
    pub country: String,
}
