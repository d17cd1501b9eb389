//! Text-first search with an embedding fallback.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use iw_core::{
    Bookmark, EntityKind, EntityStore, IwResult, MatchTier, Note, SearchHit, SearchMode,
    SearchScope,
};

use crate::config::SearchConfig;
use crate::embedding::EmbeddingService;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub query: String,
    pub notes: Vec<SearchHit<Note>>,
    pub bookmarks: Vec<SearchHit<Bookmark>>,
    pub mode: SearchMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_search: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<bool>,
}

impl SearchResponse {
    fn new(
        query: &str,
        notes: Vec<SearchHit<Note>>,
        bookmarks: Vec<SearchHit<Bookmark>>,
        mode: SearchMode,
    ) -> Self {
        Self {
            query: query.to_string(),
            notes,
            bookmarks,
            mode,
            text_search: (mode == SearchMode::Text).then_some(true),
            fallback: (mode == SearchMode::Fallback).then_some(true),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.bookmarks.is_empty()
    }
}

/// Fields text ranking needs from an entity.
trait Searchable {
    fn id(&self) -> Uuid;
    fn title(&self) -> &str;
}

impl Searchable for Note {
    fn id(&self) -> Uuid {
        self.id
    }
    fn title(&self) -> &str {
        &self.title
    }
}

impl Searchable for Bookmark {
    fn id(&self) -> Uuid {
        self.id
    }
    fn title(&self) -> &str {
        &self.title
    }
}

pub struct SearchOrchestrator {
    store: Arc<dyn EntityStore>,
    embeddings: Arc<EmbeddingService>,
    similarity_threshold: f64,
    result_limit: usize,
    candidate_limit: usize,
}

impl SearchOrchestrator {
    pub fn new(
        config: &SearchConfig,
        store: Arc<dyn EntityStore>,
        embeddings: Arc<EmbeddingService>,
    ) -> Self {
        Self {
            store,
            embeddings,
            similarity_threshold: config.similarity_threshold,
            result_limit: config.result_limit,
            candidate_limit: config.text_candidate_limit.max(config.result_limit),
        }
    }

    /// Search the user's notes and bookmarks.
    ///
    /// Text matches win outright. Only when there are none is the query
    /// embedded and matched against stored entity embeddings; if that finds
    /// nothing too, the empty result is tagged [`SearchMode::Fallback`].
    pub async fn search(
        &self,
        query: &str,
        user_id: &str,
        scope: SearchScope,
    ) -> IwResult<SearchResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SearchResponse::new(query, Vec::new(), Vec::new(), SearchMode::Fallback));
        }

        let (notes, bookmarks) = self.text_search(query, user_id, scope).await?;
        if !notes.is_empty() || !bookmarks.is_empty() {
            debug!(user_id, notes = notes.len(), bookmarks = bookmarks.len(), "text search matched");
            return Ok(SearchResponse::new(query, notes, bookmarks, SearchMode::Text));
        }

        match self.semantic_search(query, user_id, scope).await {
            Ok((notes, bookmarks)) if !notes.is_empty() || !bookmarks.is_empty() => {
                Ok(SearchResponse::new(query, notes, bookmarks, SearchMode::Semantic))
            }
            Ok(_) => Ok(SearchResponse::new(query, Vec::new(), Vec::new(), SearchMode::Fallback)),
            Err(e) => {
                warn!(user_id, error = %e, "semantic search failed, returning text results");
                Ok(SearchResponse::new(query, Vec::new(), Vec::new(), SearchMode::Fallback))
            }
        }
    }

    async fn text_search(
        &self,
        query: &str,
        user_id: &str,
        scope: SearchScope,
    ) -> IwResult<(Vec<SearchHit<Note>>, Vec<SearchHit<Bookmark>>)> {
        let notes = if scope.includes(EntityKind::Note) {
            let rows = self
                .store
                .find_notes_by_text(user_id, query, self.candidate_limit)
                .await?;
            rank_text_hits(query, rows, self.result_limit)
        } else {
            Vec::new()
        };
        let bookmarks = if scope.includes(EntityKind::Bookmark) {
            let rows = self
                .store
                .find_bookmarks_by_text(user_id, query, self.candidate_limit)
                .await?;
            rank_text_hits(query, rows, self.result_limit)
        } else {
            Vec::new()
        };
        Ok((notes, bookmarks))
    }

    async fn semantic_search(
        &self,
        query: &str,
        user_id: &str,
        scope: SearchScope,
    ) -> IwResult<(Vec<SearchHit<Note>>, Vec<SearchHit<Bookmark>>)> {
        let (vector, source) = self.embeddings.embed_query(query).await;
        debug!(user_id, ?source, "query embedded");
        if vector.iter().all(|v| *v == 0.0) {
            return Ok((Vec::new(), Vec::new()));
        }

        let mut notes = Vec::new();
        if scope.includes(EntityKind::Note) {
            for (id, score) in self.nearest(user_id, EntityKind::Note, &vector).await? {
                if let Some(note) = self.store.get_note(user_id, id).await? {
                    notes.push(semantic_hit(note, score));
                }
            }
        }

        let mut bookmarks = Vec::new();
        if scope.includes(EntityKind::Bookmark) {
            for (id, score) in self.nearest(user_id, EntityKind::Bookmark, &vector).await? {
                if let Some(bookmark) = self.store.get_bookmark(user_id, id).await? {
                    bookmarks.push(semantic_hit(bookmark, score));
                }
            }
        }

        Ok((notes, bookmarks))
    }

    async fn nearest(
        &self,
        user_id: &str,
        kind: EntityKind,
        vector: &[f32],
    ) -> IwResult<Vec<(Uuid, f64)>> {
        self.embeddings
            .nearest(user_id, kind, vector, self.similarity_threshold, self.result_limit)
            .await
    }
}

fn semantic_hit<T>(item: T, score: f64) -> SearchHit<T> {
    SearchHit {
        item,
        score,
        matched_by: MatchTier::Semantic,
    }
}

fn text_tier<T: Searchable>(query_lower: &str, item: &T) -> MatchTier {
    let title = item.title().trim().to_lowercase();
    if title == query_lower {
        MatchTier::ExactTitle
    } else if title.contains(query_lower) {
        MatchTier::PartialTitle
    } else {
        MatchTier::Body
    }
}

/// Tier, dedupe by id keeping the best tier, and order best first.
/// Ties keep the store's order.
fn rank_text_hits<T: Searchable>(query: &str, rows: Vec<T>, limit: usize) -> Vec<SearchHit<T>> {
    let query_lower = query.to_lowercase();
    let mut best: HashMap<Uuid, usize> = HashMap::new();
    let mut hits: Vec<SearchHit<T>> = Vec::with_capacity(rows.len());

    for row in rows {
        let tier = text_tier(&query_lower, &row);
        match best.get(&row.id()) {
            Some(&idx) => {
                if tier < hits[idx].matched_by {
                    hits[idx] = SearchHit {
                        item: row,
                        score: tier.confidence(),
                        matched_by: tier,
                    };
                }
            }
            None => {
                best.insert(row.id(), hits.len());
                hits.push(SearchHit {
                    item: row,
                    score: tier.confidence(),
                    matched_by: tier,
                });
            }
        }
    }

    hits.sort_by_key(|hit| hit.matched_by);
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::config::CacheConfig;
    use crate::test_utils::CountingEmbedder;
    use iw_core::{ManualClock, VectorStore};
    use iw_storage::{InMemoryKvStore, SqliteEntityStore};
    use std::time::Duration;

    struct Harness {
        store: Arc<SqliteEntityStore>,
        embeddings: Arc<EmbeddingService>,
        embedder: Arc<CountingEmbedder>,
        search: SearchOrchestrator,
    }

    fn harness(embedder: CountingEmbedder) -> Harness {
        let clock = Arc::new(ManualClock::default());
        let kv = Arc::new(InMemoryKvStore::with_clock(clock.clone()));
        let cache = Arc::new(ResultCache::new(&CacheConfig::default(), Some(kv), clock));
        let store = Arc::new(SqliteEntityStore::open_in_memory().unwrap());
        let embedder = Arc::new(embedder);
        let embeddings = Arc::new(EmbeddingService::new(
            embedder.clone(),
            cache,
            store.clone(),
            &CacheConfig::default(),
            Duration::from_millis(200),
        ));
        let search = SearchOrchestrator::new(&SearchConfig::default(), store.clone(), embeddings.clone());
        Harness {
            store,
            embeddings,
            embedder,
            search,
        }
    }

    async fn add_note(h: &Harness, user: &str, title: &str, content: &str) -> Note {
        let note = Note::new(user, title, content);
        h.store.insert_note(&note).await.unwrap();
        h.embeddings
            .refresh_entity(user, EntityKind::Note, note.id, &note.embedding_text())
            .await
            .unwrap();
        note
    }

    #[tokio::test]
    async fn exact_title_match_ranks_first() {
        let h = harness(CountingEmbedder::healthy(512));
        add_note(&h, "alice", "Weekly review notes", "weekly review template").await;
        add_note(&h, "alice", "Groceries", "remember the weekly review").await;
        let exact = add_note(&h, "alice", "Weekly Review", "what went well").await;

        let response = h
            .search
            .search("weekly review", "alice", SearchScope::All)
            .await
            .unwrap();
        assert_eq!(response.mode, SearchMode::Text);
        assert_eq!(response.text_search, Some(true));
        assert_eq!(response.notes.len(), 3);
        assert_eq!(response.notes[0].item.id, exact.id);
        assert_eq!(response.notes[0].matched_by, MatchTier::ExactTitle);
        assert_eq!(response.notes[1].matched_by, MatchTier::PartialTitle);
        assert_eq!(response.notes[2].matched_by, MatchTier::Body);
        assert_eq!(h.embedder.calls(), 3, "text hits skip query embedding");
    }

    #[tokio::test]
    async fn exact_title_survives_many_newer_body_matches() {
        let h = harness(CountingEmbedder::healthy(64));
        let meeting = Note::new("alice", "Meeting", "agenda");
        h.store.insert_note(&meeting).await.unwrap();
        for i in 0..60 {
            let note = Note::new("alice", format!("Day {i}"), "had a meeting today");
            h.store.insert_note(&note).await.unwrap();
        }

        let response = h
            .search
            .search("meeting", "alice", SearchScope::Notes)
            .await
            .unwrap();
        assert_eq!(response.mode, SearchMode::Text);
        assert_eq!(response.notes[0].item.id, meeting.id);
        assert_eq!(response.notes[0].matched_by, MatchTier::ExactTitle);
    }

    #[tokio::test]
    async fn non_ascii_title_matches_as_text() {
        let h = harness(CountingEmbedder::healthy(64));
        let note = add_note(&h, "alice", "Über", "deutsch").await;

        for query in ["Über", "über"] {
            let response = h
                .search
                .search(query, "alice", SearchScope::Notes)
                .await
                .unwrap();
            assert_eq!(response.mode, SearchMode::Text, "query {query:?}");
            assert_eq!(response.notes.len(), 1);
            assert_eq!(response.notes[0].item.id, note.id);
            assert_eq!(response.notes[0].matched_by, MatchTier::ExactTitle);
        }
    }

    #[tokio::test]
    async fn bookmarks_match_on_url() {
        let h = harness(CountingEmbedder::healthy(512));
        let bookmark = Bookmark::new("alice", "Async book", "https://rust-lang.github.io/async-book");
        h.store.insert_bookmark(&bookmark).await.unwrap();

        let response = h
            .search
            .search("async-book", "alice", SearchScope::Bookmarks)
            .await
            .unwrap();
        assert_eq!(response.mode, SearchMode::Text);
        assert!(response.notes.is_empty());
        assert_eq!(response.bookmarks[0].matched_by, MatchTier::Body);
    }

    #[tokio::test]
    async fn scope_limits_kinds() {
        let h = harness(CountingEmbedder::healthy(512));
        add_note(&h, "alice", "Tokio", "runtime").await;
        let bookmark = Bookmark::new("alice", "Tokio", "https://tokio.rs");
        h.store.insert_bookmark(&bookmark).await.unwrap();

        let notes_only = h.search.search("tokio", "alice", SearchScope::Notes).await.unwrap();
        assert_eq!(notes_only.notes.len(), 1);
        assert!(notes_only.bookmarks.is_empty());
    }

    #[tokio::test]
    async fn semantic_search_runs_when_text_finds_nothing() {
        let h = harness(CountingEmbedder::healthy(512));
        let note = add_note(&h, "alice", "Plants", "tomato basil garden compost").await;

        // Shares vocabulary with the stored embedding but not a substring.
        let response = h
            .search
            .search("garden tomato basil", "alice", SearchScope::All)
            .await
            .unwrap();
        assert_eq!(response.mode, SearchMode::Semantic);
        assert_eq!(response.notes[0].item.id, note.id);
        assert_eq!(response.notes[0].matched_by, MatchTier::Semantic);
        assert!(response.notes[0].score >= 0.45);
    }

    #[tokio::test]
    async fn no_match_anywhere_is_fallback() {
        let h = harness(CountingEmbedder::healthy(512));
        add_note(&h, "alice", "Plants", "tomato basil garden").await;
        let response = h
            .search
            .search("quantum chromodynamics", "alice", SearchScope::All)
            .await
            .unwrap();
        assert_eq!(response.mode, SearchMode::Fallback);
        assert_eq!(response.fallback, Some(true));
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn other_users_entities_are_invisible() {
        let h = harness(CountingEmbedder::healthy(512));
        add_note(&h, "bob", "Secret plans", "tomato basil garden").await;
        let text = h.search.search("secret plans", "alice", SearchScope::All).await.unwrap();
        assert!(text.is_empty());
        let semantic = h
            .search
            .search("garden tomato basil", "alice", SearchScope::All)
            .await
            .unwrap();
        assert!(semantic.is_empty());
    }

    #[tokio::test]
    async fn deleted_entity_with_leftover_vector_is_skipped() {
        let h = harness(CountingEmbedder::healthy(512));
        let note = add_note(&h, "alice", "Plants", "tomato basil garden").await;
        h.store.delete_note("alice", note.id).await.unwrap();
        let response = h
            .search
            .search("garden tomato basil", "alice", SearchScope::All)
            .await
            .unwrap();
        assert_eq!(response.mode, SearchMode::Fallback);
        assert!(h.store.delete("alice", EntityKind::Note, note.id).await.unwrap());
    }

    #[test]
    fn ranking_dedups_by_id_keeping_best_tier() {
        let note = Note::new("alice", "Rust", "rust everywhere");
        let mut renamed = note.clone();
        renamed.title = "Learning Rust".into();
        let hits = rank_text_hits("rust", vec![renamed, note.clone()], 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].matched_by, MatchTier::ExactTitle);
        assert_eq!(hits[0].score, 1.0);
    }

    #[test]
    fn response_serializes_mode_flags() {
        let response = SearchResponse::new("q", Vec::new(), Vec::new(), SearchMode::Fallback);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["mode"], "fallback");
        assert_eq!(json["fallback"], true);
        assert!(json.get("textSearch").is_none());
    }
}
