use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use iw_core::IwError;

use crate::auth::auth_middleware_with_state;
use crate::state::AppState;

#[path = "rest/analyze.rs"]
mod analyze;
#[path = "rest/entities.rs"]
mod entities;
#[path = "rest/search.rs"]
mod search;

/// Error half of every handler result: a status plus `{ "error": ... }`.
pub type ApiError = (StatusCode, Json<Value>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    create_router_with_cors(state, &[])
}

pub fn create_router_with_cors(state: Arc<AppState>, cors_allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/analyze", post(analyze::analyze))
        .route("/api/search", post(search::search))
        .route("/api/search/update", post(search::update_search_embedding))
        .route(
            "/api/notes",
            get(entities::list_notes).post(entities::create_note),
        )
        .route(
            "/api/notes/:id",
            get(entities::get_note)
                .put(entities::update_note)
                .delete(entities::delete_note),
        )
        .route(
            "/api/bookmarks",
            get(entities::list_bookmarks).post(entities::create_bookmark),
        )
        .route(
            "/api/bookmarks/:id",
            get(entities::get_bookmark)
                .put(entities::update_bookmark)
                .delete(entities::delete_bookmark),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware_with_state,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(cors_allowed_origins))
        .with_state(state)
}

fn build_cors_layer(cors_allowed_origins: &[String]) -> CorsLayer {
    let mut parsed = Vec::new();
    for origin in cors_allowed_origins {
        match HeaderValue::from_str(origin) {
            Ok(value) => parsed.push(value),
            Err(err) => tracing::warn!("ignoring invalid CORS origin '{origin}': {err}"),
        }
    }

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_origin(parsed)
}

/// Malformed or mistyped JSON bodies answer 400 with the usual error shape.
pub(crate) fn parse_body<T: DeserializeOwned>(
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| api_error(StatusCode::BAD_REQUEST, rejection.body_text()))
}

pub(crate) fn map_iw_error(err: IwError) -> ApiError {
    match err {
        IwError::NoteNotFound(_) | IwError::BookmarkNotFound(_) => {
            api_error(StatusCode::NOT_FOUND, err.to_string())
        }
        IwError::InvalidInput(_) => api_error(StatusCode::BAD_REQUEST, err.to_string()),
        IwError::Auth(_) => api_error(StatusCode::UNAUTHORIZED, err.to_string()),
        _ => {
            tracing::error!(error = %err, "request failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

// --- Health ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    llm: Option<String>,
    embedding: String,
    rate_limiting: bool,
    caching: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.engine.status();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        llm: status.llm,
        embedding: status.embedding,
        rate_limiting: status.rate_limiting,
        caching: status.caching,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn not_found_errors_map_to_404() {
        let (status, Json(body)) = map_iw_error(IwError::NoteNotFound(Uuid::nil()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[test]
    fn internal_errors_hide_details() {
        let (status, Json(body)) = map_iw_error(IwError::Storage("disk on fire".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal server error");
    }

    #[test]
    fn invalid_cors_origins_are_skipped() {
        let _layer = build_cors_layer(&["https://app.example".into(), "bad\norigin".into()]);
    }
}
