use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum UserError {
    /// Request body is not JSON of the expected shape.
    #[error("{0}")]
    Malformed(String),

    #[error("{0}")]
    Validation(String),

    #[error("User with email \"{0}\" exists")]
    DuplicateEmail(String),

    /// Path id is not an integer. Reported like a missing row.
    #[error("Invalid user ID")]
    InvalidId,

    #[error("User cannot be found")]
    NotFound,

    /// Unclassified store failure, publish failure or hashing failure.
    /// The cause is logged and never returned to the caller.
    #[error("internal error: {0:#}")]
    Fatal(#[from] anyhow::Error),
}

pub type UserResult<T> = Result<T, UserError>;

impl UserError {
    pub fn status(&self) -> StatusCode {
        match self {
            UserError::Malformed(_) => StatusCode::BAD_REQUEST,
            UserError::Validation(_) | UserError::DuplicateEmail(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            UserError::InvalidId | UserError::NotFound => StatusCode::NOT_FOUND,
            UserError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for both a malformed id and a missing row.
    #[cfg(test)]
    pub fn is_not_found(&self) -> bool {
        matches!(self, UserError::InvalidId | UserError::NotFound)
    }
}

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            UserError::Fatal(e) => {
                error!(error = ?e, "request aborted");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
