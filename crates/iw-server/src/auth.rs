use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::json;

use crate::rest::ApiError;
use crate::state::AppState;

const AUTHORIZATION_BEARER_PREFIX: &str = "Bearer ";
const ENV_JWT_SECRET: &str = "INKWELL_JWT_SECRET";
const ENV_DEV_USER: &str = "INKWELL_DEV_USER";

/// Routes reachable without an identity.
const PUBLIC_PATHS: &[&str] = &["/api/health"];

/// Maximum bearer token length (8 KiB).
const MAX_TOKEN_LENGTH: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Jwt,
    DevUser,
}

/// Authenticated caller, inserted into request extensions by the middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub method: AuthMethod,
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    /// Single-user local mode: requests without a bearer token act as this user.
    pub dev_user: Option<String>,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            jwt_secret: read_non_empty_env(ENV_JWT_SECRET),
            dev_user: read_non_empty_env(ENV_DEV_USER),
        }
    }

    pub fn with_jwt_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: Some(secret.into()),
            dev_user: None,
        }
    }

    pub fn with_dev_user(user: impl Into<String>) -> Self {
        Self {
            jwt_secret: None,
            dev_user: Some(user.into()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.jwt_secret.is_some() || self.dev_user.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    sub: String,
    exp: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthError {
    NotConfigured,
    MissingAuthHeader,
    InvalidHeaderFormat,
    InvalidJwt,
}

impl AuthError {
    fn message(self) -> &'static str {
        match self {
            Self::NotConfigured => "authentication is not configured",
            Self::MissingAuthHeader => "missing bearer token",
            Self::InvalidHeaderFormat => "malformed authorization header",
            Self::InvalidJwt => "invalid or expired token",
        }
    }
}

/// Resolves the caller for every non-public route.
///
/// - A bearer token is accepted when it is a valid HS256 JWT signed with
///   `INKWELL_JWT_SECRET`; its `sub` claim is the user id.
/// - Without a token, `INKWELL_DEV_USER` (if set) is the caller.
/// - Anything else answers 401.
pub async fn auth_middleware_with_state(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let auth_context = auth_context_from_headers(request.headers(), &state.auth).map_err(|err| {
        tracing::debug!(path = %request.uri().path(), reason = err.message(), "request rejected");
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "authentication required" })),
        )
    })?;
    request.extensions_mut().insert(auth_context);
    Ok(next.run(request).await)
}

pub(crate) fn auth_context_from_headers(
    headers: &HeaderMap,
    config: &AuthConfig,
) -> Result<AuthContext, AuthError> {
    let auth_header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok());
    auth_context_from_authorization_header(auth_header, config)
}

fn auth_context_from_authorization_header(
    auth_header: Option<&str>,
    config: &AuthConfig,
) -> Result<AuthContext, AuthError> {
    if !config.is_enabled() {
        return Err(AuthError::NotConfigured);
    }

    match (auth_header, &config.jwt_secret, &config.dev_user) {
        (Some(header), Some(secret), _) => {
            let token = extract_bearer_token(header)?;
            validate_jwt(token, secret)
        }
        (None, _, Some(dev_user)) | (Some(_), None, Some(dev_user)) => Ok(AuthContext {
            user_id: dev_user.clone(),
            method: AuthMethod::DevUser,
        }),
        (None, _, None) => Err(AuthError::MissingAuthHeader),
        (Some(_), None, None) => Err(AuthError::NotConfigured),
    }
}

fn extract_bearer_token(header: &str) -> Result<&str, AuthError> {
    let token = header
        .strip_prefix(AUTHORIZATION_BEARER_PREFIX)
        .ok_or(AuthError::InvalidHeaderFormat)?;
    if token.is_empty() || token.len() > MAX_TOKEN_LENGTH {
        return Err(AuthError::InvalidHeaderFormat);
    }
    Ok(token)
}

fn validate_jwt(token: &str, secret: &str) -> Result<AuthContext, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let token_data = decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_err| AuthError::InvalidJwt)?;

    let sub = token_data.claims.sub.trim();
    if sub.is_empty() || token_data.claims.exp == 0 {
        return Err(AuthError::InvalidJwt);
    }

    Ok(AuthContext {
        user_id: sub.to_string(),
        method: AuthMethod::Jwt,
    })
}

fn read_non_empty_env(key: &str) -> Option<String> {
    let value = std::env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
