use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::users::errors::{UserError, UserResult};

pub const EMAIL_MAX: usize = 128;
pub const PASSWORD_MIN: usize = 3;
pub const PASSWORD_MAX: usize = 72;
pub const NAME_MAX: usize = 72;
pub const NICKNAME_MAX: usize = 32;
pub const COUNTRY_LEN: usize = 2;

/// Request body for create and update.
///
/// Missing fields deserialize as empty strings and are reported by
/// [`UserInput::validate`], so an absent field is a validation error rather
/// than a malformed body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserInput {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub nickname: String,
    pub country: String,
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

impl UserInput {
    /// Checks every field and reports all violations at once.
    pub fn validate(&self) -> UserResult<()> {
        let mut problems: Vec<String> = Vec::new();

        if self.email.is_empty() {
            problems.push("email is required".into());
        } else if !is_valid_email(&self.email) {
            problems.push("email must be a valid email address".into());
        } else if self.email.chars().count() > EMAIL_MAX {
            problems.push(format!("email must be at most {} characters", EMAIL_MAX));
        }

        let password_len = self.password.chars().count();
        if password_len == 0 {
            problems.push("password is required".into());
        } else if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&password_len) {
            problems.push(format!(
                "password must be between {} and {} characters",
                PASSWORD_MIN, PASSWORD_MAX
            ));
        }

        for (field, value, max) in [
            ("first_name", &self.first_name, NAME_MAX),
            ("last_name", &self.last_name, NAME_MAX),
            ("nickname", &self.nickname, NICKNAME_MAX),
        ] {
            if value.is_empty() {
                problems.push(format!("{} is required", field));
            } else if value.chars().count() > max {
                problems.push(format!("{} must be at most {} characters", field, max));
            }
        }

        if self.country.is_empty() {
            problems.push("country is required".into());
        } else if self.country.chars().count() != COUNTRY_LEN
            || !self.country.chars().all(|c| c.is_ascii_alphabetic())
        {
            problems.push("country must be a 2-letter alphabetic code".into());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(UserError::Validation(problems.join("; ")))
        }
    }
}

/// Raw request body, decoded only when the service is ready to look at it.
///
/// Update checks that the user exists before the body is decoded, so a
/// request to a missing id reports not-found whatever the body holds.
#[derive(Debug, Clone)]
pub struct UserPayload(Bytes);

impl UserPayload {
    pub fn new(body: Bytes) -> Self {
        Self(body)
    }

    /// Parses and validates the body: bad JSON is `Malformed`, rule
    /// violations are `Validation`.
    pub fn decode(&self) -> UserResult<UserInput> {
        let input: UserInput =
            serde_json::from_slice(&self.0).map_err(|e| UserError::Malformed(e.to_string()))?;
        input.validate()?;
        Ok(input)
    }
}

/// `GET /users` query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexQuery {
    pub country: Option<String>,
}
