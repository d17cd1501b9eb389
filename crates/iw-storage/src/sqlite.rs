use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use iw_core::*;

/// SQLite WAL mode supports 1 writer + N readers, so a small pool removes
/// head-of-line blocking for concurrent reads.
const DEFAULT_POOL_SIZE: usize = 4;

const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../migrations/001_initial.sql"))];

const NOTE_COLUMNS: &str = "id, user_id, title, content, folder_id, created_at, updated_at";
const BOOKMARK_COLUMNS: &str =
    "id, user_id, title, url, description, folder_id, created_at, updated_at";

/// Text candidates are cut at the limit after title matches, so an exact or
/// partial title hit is never crowded out by newer body matches.
const TITLE_TIER: &str = "CASE WHEN trim(fold_case(title)) = ?2 THEN 0 \
                          WHEN instr(fold_case(title), ?2) > 0 THEN 1 ELSE 2 END";

/// Row store for notes, bookmarks and their stored embeddings.
pub struct SqliteEntityStore {
    pool: Vec<Mutex<Connection>>,
    next_slot: AtomicUsize,
}

impl SqliteEntityStore {
    /// Run a synchronous closure on the next pooled connection.
    ///
    /// The closure is not async, so the guard always drops before any
    /// `.await` in the caller.
    fn with_conn<F, T>(&self, f: F) -> IwResult<T>
    where
        F: FnOnce(&Connection) -> IwResult<T>,
    {
        let idx = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        let conn = self.pool[idx]
            .lock()
            .map_err(|e| IwError::Storage(e.to_string()))?;
        f(&conn)
    }

    fn open_connection(path: &Path) -> IwResult<Connection> {
        let conn = Connection::open(path)
            .map_err(|e| IwError::Storage(format!("failed to open sqlite: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| IwError::Storage(format!("pragma error: {e}")))?;
        register_functions(&conn)?;
        Ok(conn)
    }

    pub fn open(path: &Path) -> IwResult<Self> {
        let mut pool = Vec::with_capacity(DEFAULT_POOL_SIZE);
        for _ in 0..DEFAULT_POOL_SIZE {
            pool.push(Mutex::new(Self::open_connection(path)?));
        }
        let store = Self {
            pool,
            next_slot: AtomicUsize::new(0),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn open_in_memory() -> IwResult<Self> {
        // Shared-cache URI so every pooled connection sees the same database.
        let uri = format!("file:inkwell{}?mode=memory&cache=shared", Uuid::new_v4());
        let flags = rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
            | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
            | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX
            | rusqlite::OpenFlags::SQLITE_OPEN_URI;
        let mut pool = Vec::with_capacity(DEFAULT_POOL_SIZE);
        for _ in 0..DEFAULT_POOL_SIZE {
            let conn = Connection::open_with_flags(&uri, flags).map_err(|e| {
                IwError::Storage(format!("failed to open in-memory sqlite: {e}"))
            })?;
            register_functions(&conn)?;
            pool.push(Mutex::new(conn));
        }
        let store = Self {
            pool,
            next_slot: AtomicUsize::new(0),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> IwResult<()> {
        let conn = self.pool[0]
            .lock()
            .map_err(|e| IwError::Storage(e.to_string()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )
        .map_err(|e| IwError::Storage(format!("migration table: {e}")))?;

        for (version, sql) in MIGRATIONS {
            let applied: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
                    params![version],
                    |row| row.get(0),
                )
                .map_err(|e| IwError::Storage(e.to_string()))?;
            if applied {
                continue;
            }
            conn.execute_batch(sql)
                .map_err(|e| IwError::Storage(format!("migration {version} failed: {e}")))?;
            conn.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, Utc::now().to_rfc3339()],
            )
            .map_err(|e| IwError::Storage(e.to_string()))?;
            tracing::debug!(version, "applied sqlite migration");
        }
        Ok(())
    }

    fn row_to_note(row: &Row<'_>) -> rusqlite::Result<Note> {
        Ok(Note {
            id: parse_uuid(0, row.get(0)?)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            content: row.get(3)?,
            folder_id: row
                .get::<_, Option<String>>(4)?
                .map(|s| parse_uuid(4, s))
                .transpose()?,
            created_at: parse_timestamp(5, row.get(5)?)?,
            updated_at: parse_timestamp(6, row.get(6)?)?,
        })
    }

    fn row_to_bookmark(row: &Row<'_>) -> rusqlite::Result<Bookmark> {
        Ok(Bookmark {
            id: parse_uuid(0, row.get(0)?)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            url: row.get(3)?,
            description: row.get(4)?,
            folder_id: row
                .get::<_, Option<String>>(5)?
                .map(|s| parse_uuid(5, s))
                .transpose()?,
            created_at: parse_timestamp(6, row.get(6)?)?,
            updated_at: parse_timestamp(7, row.get(7)?)?,
        })
    }

    fn query_notes(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> IwResult<Vec<Note>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| IwError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params, Self::row_to_note)
            .map_err(|e| IwError::Storage(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| IwError::Storage(e.to_string()))
    }

    fn query_bookmarks(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> IwResult<Vec<Bookmark>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| IwError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params, Self::row_to_bookmark)
            .map_err(|e| IwError::Storage(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| IwError::Storage(e.to_string()))
    }
}

/// `fold_case(text)`: Unicode lowercase, matching how search needles are
/// folded. SQLite's own `lower()` only folds ASCII.
fn register_functions(conn: &Connection) -> IwResult<()> {
    conn.create_scalar_function(
        "fold_case",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|text| text.to_lowercase())),
    )
    .map_err(|e| IwError::Storage(format!("failed to register fold_case: {e}")))
}

fn parse_uuid(idx: usize, raw: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_timestamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity; zero-magnitude inputs score 0.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut left_norm = 0.0f64;
    let mut right_norm = 0.0f64;

    for (l, r) in left.iter().zip(right) {
        let l = *l as f64;
        let r = *r as f64;
        dot += l * r;
        left_norm += l * l;
        right_norm += r * r;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm.sqrt() * right_norm.sqrt())
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn insert_note(&self, note: &Note) -> IwResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notes (id, user_id, title, content, folder_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    note.id.to_string(),
                    note.user_id,
                    note.title,
                    note.content,
                    note.folder_id.map(|id| id.to_string()),
                    note.created_at.to_rfc3339(),
                    note.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| IwError::Storage(format!("insert note failed: {e}")))?;
            Ok(())
        })
    }

    async fn get_note(&self, user_id: &str, id: Uuid) -> IwResult<Option<Note>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1 AND user_id = ?2"),
                params![id.to_string(), user_id],
                Self::row_to_note,
            )
            .optional()
            .map_err(|e| IwError::Storage(e.to_string()))
        })
    }

    async fn update_note(&self, note: &Note) -> IwResult<bool> {
        self.with_conn(|conn| {
            let rows = conn
                .execute(
                    "UPDATE notes SET title = ?3, content = ?4, folder_id = ?5, updated_at = ?6
                     WHERE id = ?1 AND user_id = ?2",
                    params![
                        note.id.to_string(),
                        note.user_id,
                        note.title,
                        note.content,
                        note.folder_id.map(|id| id.to_string()),
                        note.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(|e| IwError::Storage(format!("update note failed: {e}")))?;
            Ok(rows > 0)
        })
    }

    async fn delete_note(&self, user_id: &str, id: Uuid) -> IwResult<bool> {
        self.with_conn(|conn| {
            let rows = conn
                .execute(
                    "DELETE FROM notes WHERE id = ?1 AND user_id = ?2",
                    params![id.to_string(), user_id],
                )
                .map_err(|e| IwError::Storage(format!("delete note failed: {e}")))?;
            Ok(rows > 0)
        })
    }

    async fn list_notes(&self, user_id: &str, limit: usize, offset: usize) -> IwResult<Vec<Note>> {
        self.with_conn(|conn| {
            Self::query_notes(
                conn,
                &format!(
                    "SELECT {NOTE_COLUMNS} FROM notes WHERE user_id = ?1
                     ORDER BY updated_at DESC LIMIT ?2 OFFSET ?3"
                ),
                params![user_id, limit as i64, offset as i64],
            )
        })
    }

    async fn insert_bookmark(&self, bookmark: &Bookmark) -> IwResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO bookmarks (id, user_id, title, url, description, folder_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    bookmark.id.to_string(),
                    bookmark.user_id,
                    bookmark.title,
                    bookmark.url,
                    bookmark.description,
                    bookmark.folder_id.map(|id| id.to_string()),
                    bookmark.created_at.to_rfc3339(),
                    bookmark.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| IwError::Storage(format!("insert bookmark failed: {e}")))?;
            Ok(())
        })
    }

    async fn get_bookmark(&self, user_id: &str, id: Uuid) -> IwResult<Option<Bookmark>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {BOOKMARK_COLUMNS} FROM bookmarks WHERE id = ?1 AND user_id = ?2"),
                params![id.to_string(), user_id],
                Self::row_to_bookmark,
            )
            .optional()
            .map_err(|e| IwError::Storage(e.to_string()))
        })
    }

    async fn update_bookmark(&self, bookmark: &Bookmark) -> IwResult<bool> {
        self.with_conn(|conn| {
            let rows = conn
                .execute(
                    "UPDATE bookmarks SET title = ?3, url = ?4, description = ?5, folder_id = ?6, updated_at = ?7
                     WHERE id = ?1 AND user_id = ?2",
                    params![
                        bookmark.id.to_string(),
                        bookmark.user_id,
                        bookmark.title,
                        bookmark.url,
                        bookmark.description,
                        bookmark.folder_id.map(|id| id.to_string()),
                        bookmark.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(|e| IwError::Storage(format!("update bookmark failed: {e}")))?;
            Ok(rows > 0)
        })
    }

    async fn delete_bookmark(&self, user_id: &str, id: Uuid) -> IwResult<bool> {
        self.with_conn(|conn| {
            let rows = conn
                .execute(
                    "DELETE FROM bookmarks WHERE id = ?1 AND user_id = ?2",
                    params![id.to_string(), user_id],
                )
                .map_err(|e| IwError::Storage(format!("delete bookmark failed: {e}")))?;
            Ok(rows > 0)
        })
    }

    async fn list_bookmarks(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> IwResult<Vec<Bookmark>> {
        self.with_conn(|conn| {
            Self::query_bookmarks(
                conn,
                &format!(
                    "SELECT {BOOKMARK_COLUMNS} FROM bookmarks WHERE user_id = ?1
                     ORDER BY updated_at DESC LIMIT ?2 OFFSET ?3"
                ),
                params![user_id, limit as i64, offset as i64],
            )
        })
    }

    async fn find_notes_by_text(
        &self,
        user_id: &str,
        needle: &str,
        limit: usize,
    ) -> IwResult<Vec<Note>> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            Self::query_notes(
                conn,
                &format!(
                    "SELECT {NOTE_COLUMNS} FROM notes
                     WHERE user_id = ?1
                       AND (instr(fold_case(title), ?2) > 0 OR instr(fold_case(content), ?2) > 0)
                     ORDER BY {TITLE_TIER}, updated_at DESC LIMIT ?3"
                ),
                params![user_id, needle, limit as i64],
            )
        })
    }

    async fn find_bookmarks_by_text(
        &self,
        user_id: &str,
        needle: &str,
        limit: usize,
    ) -> IwResult<Vec<Bookmark>> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            Self::query_bookmarks(
                conn,
                &format!(
                    "SELECT {BOOKMARK_COLUMNS} FROM bookmarks
                     WHERE user_id = ?1
                       AND (instr(fold_case(title), ?2) > 0
                            OR instr(fold_case(url), ?2) > 0
                            OR instr(fold_case(coalesce(description, '')), ?2) > 0)
                     ORDER BY {TITLE_TIER}, updated_at DESC LIMIT ?3"
                ),
                params![user_id, needle, limit as i64],
            )
        })
    }
}

#[async_trait]
impl VectorStore for SqliteEntityStore {
    async fn upsert(
        &self,
        user_id: &str,
        kind: EntityKind,
        id: Uuid,
        embedding: &[f32],
    ) -> IwResult<()> {
        if embedding.is_empty() {
            return Err(IwError::InvalidInput("embedding must not be empty".into()));
        }
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entity_embeddings (kind, entity_id, user_id, dimensions, vector, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(kind, entity_id) DO UPDATE SET
                    user_id = excluded.user_id,
                    dimensions = excluded.dimensions,
                    vector = excluded.vector,
                    updated_at = excluded.updated_at",
                params![
                    kind.as_str(),
                    id.to_string(),
                    user_id,
                    embedding.len() as i64,
                    encode_vector(embedding),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| IwError::Storage(format!("upsert embedding failed: {e}")))?;
            Ok(())
        })
    }

    async fn delete(&self, user_id: &str, kind: EntityKind, id: Uuid) -> IwResult<bool> {
        self.with_conn(|conn| {
            let rows = conn
                .execute(
                    "DELETE FROM entity_embeddings WHERE kind = ?1 AND entity_id = ?2 AND user_id = ?3",
                    params![kind.as_str(), id.to_string(), user_id],
                )
                .map_err(|e| IwError::Storage(format!("delete embedding failed: {e}")))?;
            Ok(rows > 0)
        })
    }

    async fn search(
        &self,
        user_id: &str,
        kind: EntityKind,
        embedding: &[f32],
        min_score: f64,
        limit: usize,
    ) -> IwResult<Vec<(Uuid, f64)>> {
        let candidates: Vec<(String, Vec<u8>)> = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT entity_id, vector FROM entity_embeddings
                     WHERE user_id = ?1 AND kind = ?2 AND dimensions = ?3",
                )
                .map_err(|e| IwError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(
                    params![user_id, kind.as_str(), embedding.len() as i64],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(|e| IwError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| IwError::Storage(e.to_string()))
        })?;

        let mut results = Vec::new();
        for (raw_id, bytes) in candidates {
            let score = cosine_similarity(embedding, &decode_vector(&bytes));
            if score < min_score {
                continue;
            }
            match Uuid::parse_str(&raw_id) {
                Ok(id) => results.push((id, score)),
                Err(err) => tracing::warn!(entity_id = %raw_id, error = %err, "skipping embedding with invalid id"),
            }
        }

        results.sort_by(|left, right| {
            right
                .1
                .partial_cmp(&left.1)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn unit(values: &[f32]) -> Vec<f32> {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        values.iter().map(|v| v / norm).collect()
    }

    #[tokio::test]
    async fn note_crud_is_owner_scoped() {
        let store = SqliteEntityStore::open_in_memory().unwrap();
        let mut note = Note::new("alice", "Rust ownership", "Borrowing rules explained");
        store.insert_note(&note).await.unwrap();

        let fetched = store.get_note("alice", note.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Rust ownership");
        assert!(store.get_note("bob", note.id).await.unwrap().is_none());

        note.content = "Updated".into();
        assert!(store.update_note(&note).await.unwrap());
        let mut foreign = note.clone();
        foreign.user_id = "bob".into();
        assert!(!store.update_note(&foreign).await.unwrap());

        assert!(!store.delete_note("bob", note.id).await.unwrap());
        assert!(store.delete_note("alice", note.id).await.unwrap());
        assert!(store.get_note("alice", note.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bookmark_roundtrip_preserves_optional_fields() {
        let store = SqliteEntityStore::open_in_memory().unwrap();
        let bookmark = Bookmark::new("alice", "Tokio docs", "https://tokio.rs")
            .with_description("async runtime")
            .with_folder(Uuid::now_v7());
        store.insert_bookmark(&bookmark).await.unwrap();

        let fetched = store
            .get_bookmark("alice", bookmark.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.description.as_deref(), Some("async runtime"));
        assert_eq!(fetched.folder_id, bookmark.folder_id);
        assert_eq!(store.list_bookmarks("alice", 10, 0).await.unwrap().len(), 1);
        assert!(store.list_bookmarks("bob", 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn text_lookup_is_case_insensitive() {
        let store = SqliteEntityStore::open_in_memory().unwrap();
        store
            .insert_note(&Note::new("alice", "Gardening", "Tomatoes need SUNLIGHT"))
            .await
            .unwrap();
        store
            .insert_bookmark(&Bookmark::new("alice", "Blog", "https://example.com/Sunlight"))
            .await
            .unwrap();

        let notes = store.find_notes_by_text("alice", "sunlight", 10).await.unwrap();
        assert_eq!(notes.len(), 1);
        let bookmarks = store
            .find_bookmarks_by_text("alice", "SUNLIGHT", 10)
            .await
            .unwrap();
        assert_eq!(bookmarks.len(), 1);
        assert!(store.find_notes_by_text("bob", "sunlight", 10).await.unwrap().is_empty());
        assert!(store.find_notes_by_text("alice", "   ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn text_lookup_keeps_title_matches_within_limit() {
        let store = SqliteEntityStore::open_in_memory().unwrap();
        let titled = Note::new("alice", "Meeting", "agenda");
        store.insert_note(&titled).await.unwrap();
        for i in 0..20 {
            store
                .insert_note(&Note::new("alice", format!("Day {i}"), "had a meeting today"))
                .await
                .unwrap();
        }
        let bookmark = Bookmark::new("alice", "Meeting room", "https://rooms.example.com");
        store.insert_bookmark(&bookmark).await.unwrap();
        for i in 0..20 {
            store
                .insert_bookmark(&Bookmark::new("alice", format!("Link {i}"), "https://example.com/meeting"))
                .await
                .unwrap();
        }

        let notes = store.find_notes_by_text("alice", "meeting", 5).await.unwrap();
        assert_eq!(notes.len(), 5);
        assert_eq!(notes[0].id, titled.id);

        let bookmarks = store.find_bookmarks_by_text("alice", "meeting", 5).await.unwrap();
        assert_eq!(bookmarks[0].id, bookmark.id);
    }

    #[tokio::test]
    async fn text_lookup_folds_non_ascii_case() {
        let store = SqliteEntityStore::open_in_memory().unwrap();
        let note = Note::new("alice", "Über Straßen", "ΣΟΦΙΑ notes");
        store.insert_note(&note).await.unwrap();

        for needle in ["über straßen", "ÜBER", "σοφια"] {
            let found = store.find_notes_by_text("alice", needle, 10).await.unwrap();
            assert_eq!(found.len(), 1, "needle {needle:?}");
            assert_eq!(found[0].id, note.id);
        }
    }

    #[tokio::test]
    async fn vector_search_ranks_and_filters_by_threshold() {
        let store = SqliteEntityStore::open_in_memory().unwrap();
        let close = Uuid::now_v7();
        let far = Uuid::now_v7();
        store
            .upsert("alice", EntityKind::Note, close, &unit(&[1.0, 0.1, 0.0]))
            .await
            .unwrap();
        store
            .upsert("alice", EntityKind::Note, far, &unit(&[0.0, 0.0, 1.0]))
            .await
            .unwrap();
        store
            .upsert("bob", EntityKind::Note, Uuid::now_v7(), &unit(&[1.0, 0.0, 0.0]))
            .await
            .unwrap();

        let results = store
            .search("alice", EntityKind::Note, &unit(&[1.0, 0.0, 0.0]), 0.45, 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, close);
        assert!(results[0].1 > 0.9);

        assert!(store.delete("alice", EntityKind::Note, close).await.unwrap());
        let results = store
            .search("alice", EntityKind::Note, &unit(&[1.0, 0.0, 0.0]), 0.45, 10)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_existing_vector() {
        let store = SqliteEntityStore::open_in_memory().unwrap();
        let id = Uuid::now_v7();
        store
            .upsert("alice", EntityKind::Bookmark, id, &[1.0, 0.0])
            .await
            .unwrap();
        store
            .upsert("alice", EntityKind::Bookmark, id, &[0.0, 1.0])
            .await
            .unwrap();
        let results = store
            .search("alice", EntityKind::Bookmark, &[0.0, 1.0], 0.9, 10)
            .await
            .unwrap();
        assert_eq!(results, vec![(id, 1.0)]);
    }

    #[test]
    fn cosine_guards_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inkwell.sqlite");
        let note = Note::new("alice", "Persisted", "body");
        {
            let store = SqliteEntityStore::open(&path).unwrap();
            store.insert_note(&note).await.unwrap();
        }
        let store = SqliteEntityStore::open(&path).unwrap();
        assert!(store.get_note("alice", note.id).await.unwrap().is_some());
    }
}
