use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use iw_core::{EntityKind, SearchScope};
use iw_engine::embedding::EmbeddingSource;
use iw_engine::search::SearchResponse;

use super::{api_error, map_iw_error, parse_body, ApiError};
use crate::auth::AuthContext;
use crate::state::AppState;
use crate::validation::{validate_embedding_update, validate_query_text};

#[derive(Debug, Deserialize)]
pub(crate) struct SearchRequest {
    #[serde(default)]
    query: String,
    #[serde(default, rename = "type")]
    scope: Option<String>,
}

/// POST /api/search: text match first, embedding similarity second.
pub(crate) async fn search(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let request = parse_body(payload)?;
    validate_query_text(&request.query)?;
    let scope = match request.scope.as_deref() {
        None => SearchScope::All,
        Some(raw) => raw
            .parse::<SearchScope>()
            .map_err(|err| api_error(StatusCode::BAD_REQUEST, err))?,
    };

    state
        .engine
        .search(&request.query, &auth.user_id, scope)
        .await
        .map(Json)
        .map_err(map_iw_error)
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateEmbeddingRequest {
    id: Uuid,
    content: String,
    #[serde(rename = "type")]
    kind: EntityKind,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateEmbeddingResponse {
    success: bool,
    source: EmbeddingSource,
}

/// POST /api/search/update: recompute and store one entity's embedding.
pub(crate) async fn update_search_embedding(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateEmbeddingRequest>, JsonRejection>,
) -> Result<Json<UpdateEmbeddingResponse>, ApiError> {
    let request = parse_body(payload)?;
    validate_embedding_update(&request.content, request.title.as_deref())?;

    let source = state
        .engine
        .update_search_embedding(
            &auth.user_id,
            request.kind,
            request.id,
            &request.content,
            request.title.as_deref(),
        )
        .await
        .map_err(map_iw_error)?;

    Ok(Json(UpdateEmbeddingResponse {
        success: true,
        source,
    }))
}
