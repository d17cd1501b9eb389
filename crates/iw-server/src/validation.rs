use axum::http::StatusCode;
use thiserror::Error;

use crate::rest::{api_error, ApiError};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{field} cannot be empty")]
    EmptyField { field: String },

    #[error("{field} exceeds max length of {max}")]
    TooLong { field: String, max: usize },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: usize, max: usize },

    #[error("{0}")]
    Custom(String),
}

impl From<&str> for ValidationError {
    fn from(s: &str) -> Self {
        ValidationError::Custom(s.to_string())
    }
}

impl ValidationError {
    /// Convert to the `{ "error": ... }` 400 response used by handlers.
    pub fn bad_request(self) -> ApiError {
        api_error(StatusCode::BAD_REQUEST, self.to_string())
    }

    /// Check if the error message contains a substring (convenience for tests).
    pub fn contains(&self, s: &str) -> bool {
        self.to_string().contains(s)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        err.bad_request()
    }
}

const MAX_TITLE_LEN: usize = 512;
const MAX_NOTE_CONTENT_LEN: usize = 64 * 1024;
const MAX_URL_LEN: usize = 2048;
const MAX_DESCRIPTION_LEN: usize = 4096;
const MAX_QUERY_TEXT_LEN: usize = 1024;
const MAX_LIST_LIMIT: usize = 200;

pub fn validate_note_payload(title: &str, content: &str) -> Result<(), ValidationError> {
    validate_required_text("title", title, MAX_TITLE_LEN)?;
    validate_bounded_text("content", content, MAX_NOTE_CONTENT_LEN)
}

pub fn validate_note_patch(title: Option<&str>, content: Option<&str>) -> Result<(), ValidationError> {
    validate_optional_text("title", title, MAX_TITLE_LEN)?;
    if let Some(content) = content {
        validate_bounded_text("content", content, MAX_NOTE_CONTENT_LEN)?;
    }
    Ok(())
}

pub fn validate_bookmark_payload(
    title: &str,
    url: &str,
    description: Option<&str>,
) -> Result<(), ValidationError> {
    validate_required_text("title", title, MAX_TITLE_LEN)?;
    validate_url(url)?;
    if let Some(description) = description {
        validate_bounded_text("description", description, MAX_DESCRIPTION_LEN)?;
    }
    Ok(())
}

pub fn validate_bookmark_patch(
    title: Option<&str>,
    url: Option<&str>,
    description: Option<&str>,
) -> Result<(), ValidationError> {
    validate_optional_text("title", title, MAX_TITLE_LEN)?;
    if let Some(url) = url {
        validate_url(url)?;
    }
    if let Some(description) = description {
        validate_bounded_text("description", description, MAX_DESCRIPTION_LEN)?;
    }
    Ok(())
}

/// Search queries may be blank (the engine answers with an empty fallback),
/// but never unbounded.
pub fn validate_query_text(query: &str) -> Result<(), ValidationError> {
    validate_bounded_text("query", query, MAX_QUERY_TEXT_LEN)
}

pub fn validate_embedding_update(content: &str, title: Option<&str>) -> Result<(), ValidationError> {
    validate_required_text("content", content, MAX_NOTE_CONTENT_LEN)?;
    if let Some(title) = title {
        validate_bounded_text("title", title, MAX_TITLE_LEN)?;
    }
    Ok(())
}

pub fn validate_list_limit(limit: usize) -> Result<(), ValidationError> {
    if limit == 0 || limit > MAX_LIST_LIMIT {
        return Err(ValidationError::OutOfRange {
            field: "limit".into(),
            min: 1,
            max: MAX_LIST_LIMIT,
        });
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<(), ValidationError> {
    validate_required_text("url", url, MAX_URL_LEN)?;
    let trimmed = url.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err("url must start with http:// or https://".into());
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err("url must not contain whitespace".into());
    }
    Ok(())
}

fn validate_required_text(name: &str, value: &str, max_len: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field: name.into() });
    }
    validate_bounded_text(name, value, max_len)
}

fn validate_optional_text(name: &str, value: Option<&str>, max_len: usize) -> Result<(), ValidationError> {
    if let Some(value) = value {
        validate_required_text(name, value, max_len)?;
    }
    Ok(())
}

fn validate_bounded_text(name: &str, value: &str, max_len: usize) -> Result<(), ValidationError> {
    if value.len() > max_len {
        return Err(ValidationError::TooLong {
            field: name.into(),
            max: max_len,
        });
    }
    Ok(())
}
