use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;

use crate::config::AppConfig;

/// SQLSTATE reported by Postgres for a unique constraint violation.
pub const UNIQUE_VIOLATION: &str = "23505";

pub async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    let db = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("run migrations")?;
    Ok(db)
}

/// Error surfaced by the persistence layer.
///
/// Database errors keep their SQLSTATE and constraint name so callers can tell
/// which constraint fired without holding on to driver types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found")]
    RowNotFound,

    #[error("database error: {message}")]
    Database {
        code: Option<String>,
        constraint: Option<String>,
        message: String,
    },

    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::RowNotFound,
            sqlx::Error::Database(db_err) => StoreError::Database {
                code: db_err.code().map(|c| c.into_owned()),
                constraint: db_err.constraint().map(str::to_owned),
                message: db_err.message().to_owned(),
            },
            other => StoreError::Sqlx(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    DuplicateKey,
    Unknown,
}

/// Decides whether `err` is a violation of exactly the unique constraint named
/// `constraint`. Every other failure is `Unknown`.
pub fn classify(err: &StoreError, constraint: &str) -> StoreErrorKind {
    match err {
        StoreError::Database {
            code: Some(code),
            constraint: Some(name),
            ..
        } if code == UNIQUE_VIOLATION && name == constraint => StoreErrorKind::DuplicateKey,
        _ => StoreErrorKind::Unknown,
    }
}
