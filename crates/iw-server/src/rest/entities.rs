//! Owner-scoped CRUD for notes and bookmarks.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use iw_core::{Bookmark, Note};
use iw_engine::engine::{BookmarkPatch, NotePatch};

use super::{map_iw_error, parse_body, ApiError};
use crate::auth::AuthContext;
use crate::state::AppState;
use crate::validation::{
    validate_bookmark_patch, validate_bookmark_payload, validate_list_limit,
    validate_note_patch, validate_note_payload,
};

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

impl ListQuery {
    fn resolve(&self) -> Result<(usize, usize), ApiError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        validate_list_limit(limit)?;
        Ok((limit, self.offset.unwrap_or(0)))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateNoteRequest {
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    folder_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateBookmarkRequest {
    title: String,
    url: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    folder_id: Option<Uuid>,
}

// --- Notes ---

pub(crate) async fn list_notes(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Note>>, ApiError> {
    let (limit, offset) = query.resolve()?;
    state
        .engine
        .list_notes(&auth.user_id, limit, offset)
        .await
        .map(Json)
        .map_err(map_iw_error)
}

pub(crate) async fn create_note(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateNoteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Note>), ApiError> {
    let request = parse_body(payload)?;
    validate_note_payload(&request.title, &request.content)?;

    let mut note = Note::new(auth.user_id, request.title.trim(), request.content);
    note.folder_id = request.folder_id;
    let note = state.engine.create_note(note).await.map_err(map_iw_error)?;
    Ok((StatusCode::CREATED, Json(note)))
}

pub(crate) async fn get_note(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Note>, ApiError> {
    state
        .engine
        .get_note(&auth.user_id, id)
        .await
        .map(Json)
        .map_err(map_iw_error)
}

pub(crate) async fn update_note(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Result<Json<NotePatch>, JsonRejection>,
) -> Result<Json<Note>, ApiError> {
    let patch = parse_body(payload)?;
    validate_note_patch(patch.title.as_deref(), patch.content.as_deref())?;
    state
        .engine
        .update_note(&auth.user_id, id, patch)
        .await
        .map(Json)
        .map_err(map_iw_error)
}

pub(crate) async fn delete_note(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .delete_note(&auth.user_id, id)
        .await
        .map_err(map_iw_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Bookmarks ---

pub(crate) async fn list_bookmarks(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Bookmark>>, ApiError> {
    let (limit, offset) = query.resolve()?;
    state
        .engine
        .list_bookmarks(&auth.user_id, limit, offset)
        .await
        .map(Json)
        .map_err(map_iw_error)
}

pub(crate) async fn create_bookmark(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateBookmarkRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Bookmark>), ApiError> {
    let request = parse_body(payload)?;
    validate_bookmark_payload(&request.title, &request.url, request.description.as_deref())?;

    let mut bookmark = Bookmark::new(auth.user_id, request.title.trim(), request.url.trim());
    if let Some(description) = request.description.filter(|d| !d.trim().is_empty()) {
        bookmark = bookmark.with_description(description);
    }
    bookmark.folder_id = request.folder_id;
    let bookmark = state
        .engine
        .create_bookmark(bookmark)
        .await
        .map_err(map_iw_error)?;
    Ok((StatusCode::CREATED, Json(bookmark)))
}

pub(crate) async fn get_bookmark(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Bookmark>, ApiError> {
    state
        .engine
        .get_bookmark(&auth.user_id, id)
        .await
        .map(Json)
        .map_err(map_iw_error)
}

pub(crate) async fn update_bookmark(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Result<Json<BookmarkPatch>, JsonRejection>,
) -> Result<Json<Bookmark>, ApiError> {
    let patch = parse_body(payload)?;
    validate_bookmark_patch(
        patch.title.as_deref(),
        patch.url.as_deref(),
        patch.description.as_deref(),
    )?;
    state
        .engine
        .update_bookmark(&auth.user_id, id, patch)
        .await
        .map(Json)
        .map_err(map_iw_error)
}

pub(crate) async fn delete_bookmark(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .delete_bookmark(&auth.user_id, id)
        .await
        .map_err(map_iw_error)?;
    Ok(StatusCode::NO_CONTENT)
}
