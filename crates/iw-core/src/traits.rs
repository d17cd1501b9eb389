use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::IwResult;
use crate::model::*;

/// Owner-scoped row storage for notes and bookmarks.
///
/// Every read and write is filtered by `user_id`; rows owned by another user
/// behave as if they did not exist.
#[async_trait]
pub trait EntityStore: Send + Sync {
    // --- Notes ---
    async fn insert_note(&self, note: &Note) -> IwResult<()>;
    async fn get_note(&self, user_id: &str, id: Uuid) -> IwResult<Option<Note>>;
    async fn update_note(&self, note: &Note) -> IwResult<bool>;
    async fn delete_note(&self, user_id: &str, id: Uuid) -> IwResult<bool>;
    async fn list_notes(&self, user_id: &str, limit: usize, offset: usize) -> IwResult<Vec<Note>>;

    // --- Bookmarks ---
    async fn insert_bookmark(&self, bookmark: &Bookmark) -> IwResult<()>;
    async fn get_bookmark(&self, user_id: &str, id: Uuid) -> IwResult<Option<Bookmark>>;
    async fn update_bookmark(&self, bookmark: &Bookmark) -> IwResult<bool>;
    async fn delete_bookmark(&self, user_id: &str, id: Uuid) -> IwResult<bool>;
    async fn list_bookmarks(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> IwResult<Vec<Bookmark>>;

    // --- Text search candidates ---
    /// Notes whose title or content contains `needle` (case-insensitive).
    async fn find_notes_by_text(
        &self,
        user_id: &str,
        needle: &str,
        limit: usize,
    ) -> IwResult<Vec<Note>>;
    /// Bookmarks whose title, URL or description contains `needle` (case-insensitive).
    async fn find_bookmarks_by_text(
        &self,
        user_id: &str,
        needle: &str,
        limit: usize,
    ) -> IwResult<Vec<Bookmark>>;
}

fn _assert_entity_store_object_safe(_: &dyn EntityStore) {}

/// Stored entity embeddings + similarity search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        user_id: &str,
        kind: EntityKind,
        id: Uuid,
        embedding: &[f32],
    ) -> IwResult<()>;
    async fn delete(&self, user_id: &str, kind: EntityKind, id: Uuid) -> IwResult<bool>;
    /// Ids with similarity `>= min_score`, best first, at most `limit`.
    async fn search(
        &self,
        user_id: &str,
        kind: EntityKind,
        embedding: &[f32],
        min_score: f64,
        limit: usize,
    ) -> IwResult<Vec<(Uuid, f64)>>;
}

/// Key/value store with expiring keys and atomic counters.
///
/// This is the backing store for rate-limit counters and cached results.
/// Implementations must make `incr` atomic with respect to concurrent callers.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> IwResult<Option<String>>;
    /// Set `key`, replacing any value and TTL. `ttl = None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> IwResult<()>;
    /// Atomically increment an integer value, creating it at 1 when absent.
    /// An existing TTL is preserved.
    async fn incr(&self, key: &str) -> IwResult<i64>;
    /// Set a TTL on an existing key. Returns false when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> IwResult<bool>;
    /// Remaining TTL, or `None` when the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> IwResult<Option<Duration>>;
    async fn delete(&self, key: &str) -> IwResult<bool>;
}

fn _assert_kv_store_object_safe(_: &dyn KvStore) {}

/// Embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> IwResult<Vec<f32>>;
    fn dimensions(&self) -> usize;
    /// Provider name for logging/diagnostics.
    fn name(&self) -> &str;
}
