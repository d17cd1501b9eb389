use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use iw_core::*;
use iw_storage::{InMemoryKvStore, SqliteEntityStore};

use crate::analysis::{AnalysisError, AnalysisOrchestrator, AnalysisOutcome};
use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::embedding::{init_embedder, EmbeddingService, EmbeddingSource};
use crate::llm::{init_llm_provider, LlmProvider};
use crate::rate_limit::RateLimiter;
use crate::search::{SearchOrchestrator, SearchResponse};

const DATABASE_FILE: &str = "inkwell.sqlite";

/// Partial update for a note; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub folder_id: Option<Uuid>,
}

/// Partial update for a bookmark; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookmarkPatch {
    pub title: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub folder_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub llm: Option<String>,
    pub embedding: String,
    pub rate_limiting: bool,
    pub caching: bool,
}

/// Collaborators the engine is assembled from.
pub struct EngineParts {
    pub entities: Arc<dyn EntityStore>,
    pub vectors: Arc<dyn VectorStore>,
    /// Counter/cache store. `None` disables rate limiting and caching.
    pub kv: Option<Arc<dyn KvStore>>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub embedder: Arc<dyn Embedder>,
    pub clock: Arc<dyn Clock>,
    pub rng: StdRng,
}

pub struct InkwellEngine {
    pub config: EngineConfig,
    pub entities: Arc<dyn EntityStore>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<ResultCache>,
    pub embeddings: Arc<EmbeddingService>,
    pub analysis: AnalysisOrchestrator,
    pub search: SearchOrchestrator,
}

impl InkwellEngine {
    /// Initialize the engine from configuration.
    pub async fn init(config: EngineConfig) -> IwResult<Self> {
        let data_dir = PathBuf::from(&config.data_dir);
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| IwError::Storage(format!("create data dir: {e}")))?;

        let store = Arc::new(SqliteEntityStore::open(&data_dir.join(DATABASE_FILE))?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::with_clock(clock.clone()));

        let parts = EngineParts {
            entities: store.clone(),
            vectors: store,
            kv: Some(kv),
            llm: init_llm_provider(&config.llm),
            embedder: init_embedder(&config.embedding, &config.llm),
            clock,
            rng: StdRng::from_entropy(),
        };

        let engine = Self::from_parts(config, parts);
        info!(
            data_dir = %engine.config.data_dir,
            rate_limiting = engine.limiter.is_enforced(),
            caching = engine.cache.is_enabled(),
            embedding = engine.embeddings.provider_name(),
            "engine initialized"
        );
        Ok(engine)
    }

    /// Assemble the engine from explicit collaborators.
    pub fn from_parts(config: EngineConfig, parts: EngineParts) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            &config.rate_limit,
            parts.kv.clone(),
            parts.clock.clone(),
        ));
        let cache = Arc::new(ResultCache::new(&config.cache, parts.kv, parts.clock));
        let embeddings = Arc::new(EmbeddingService::new(
            parts.embedder,
            cache.clone(),
            parts.vectors,
            &config.cache,
            Duration::from_secs(config.llm.timeout_secs),
        ));
        let analysis = AnalysisOrchestrator::new(
            &config,
            parts.llm,
            limiter.clone(),
            cache.clone(),
            parts.rng,
        );
        let search =
            SearchOrchestrator::new(&config.search, parts.entities.clone(), embeddings.clone());

        Self {
            config,
            entities: parts.entities,
            limiter,
            cache,
            embeddings,
            analysis,
            search,
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            llm: self.analysis.provider_name().map(str::to_string),
            embedding: self.embeddings.provider_name().to_string(),
            rate_limiting: self.limiter.is_enforced(),
            caching: self.cache.is_enabled(),
        }
    }

    // --- Analysis & search ---

    pub async fn analyze(
        &self,
        content: &str,
        user_id: &str,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        self.analysis.analyze(content, user_id).await
    }

    pub async fn search(
        &self,
        query: &str,
        user_id: &str,
        scope: SearchScope,
    ) -> IwResult<SearchResponse> {
        self.search.search(query, user_id, scope).await
    }

    /// Recompute the stored embedding of an entity the user owns.
    pub async fn update_search_embedding(
        &self,
        user_id: &str,
        kind: EntityKind,
        id: Uuid,
        content: &str,
        title: Option<&str>,
    ) -> IwResult<EmbeddingSource> {
        let owned = match kind {
            EntityKind::Note => self.entities.get_note(user_id, id).await?.is_some(),
            EntityKind::Bookmark => self.entities.get_bookmark(user_id, id).await?.is_some(),
        };
        if !owned {
            return Err(IwError::not_found(kind, id));
        }
        let text = embedding_text(title, content);
        self.embeddings.refresh_entity(user_id, kind, id, &text).await
    }

    /// Entity saves succeed even when the embedding refresh does not.
    async fn refresh_embedding_best_effort(
        &self,
        user_id: &str,
        kind: EntityKind,
        id: Uuid,
        text: &str,
    ) {
        if let Err(e) = self.embeddings.refresh_entity(user_id, kind, id, text).await {
            warn!(user_id, kind = %kind, id = %id, error = %e, "embedding refresh failed");
        }
    }

    async fn remove_embedding_best_effort(&self, user_id: &str, kind: EntityKind, id: Uuid) {
        if let Err(e) = self.embeddings.remove_entity(user_id, kind, id).await {
            warn!(user_id, kind = %kind, id = %id, error = %e, "embedding removal failed");
        }
    }

    // --- Notes ---

    pub async fn create_note(&self, note: Note) -> IwResult<Note> {
        self.entities.insert_note(&note).await?;
        self.refresh_embedding_best_effort(&note.user_id, EntityKind::Note, note.id, &note.embedding_text())
            .await;
        Ok(note)
    }

    pub async fn get_note(&self, user_id: &str, id: Uuid) -> IwResult<Note> {
        self.entities
            .get_note(user_id, id)
            .await?
            .ok_or(IwError::NoteNotFound(id))
    }

    pub async fn list_notes(&self, user_id: &str, limit: usize, offset: usize) -> IwResult<Vec<Note>> {
        self.entities.list_notes(user_id, limit, offset).await
    }

    pub async fn update_note(&self, user_id: &str, id: Uuid, patch: NotePatch) -> IwResult<Note> {
        let mut note = self.get_note(user_id, id).await?;
        if let Some(title) = patch.title {
            note.title = title;
        }
        if let Some(content) = patch.content {
            note.content = content;
        }
        if let Some(folder_id) = patch.folder_id {
            note.folder_id = Some(folder_id);
        }
        note.updated_at = Utc::now();

        if !self.entities.update_note(&note).await? {
            return Err(IwError::NoteNotFound(id));
        }
        self.refresh_embedding_best_effort(user_id, EntityKind::Note, id, &note.embedding_text())
            .await;
        Ok(note)
    }

    pub async fn delete_note(&self, user_id: &str, id: Uuid) -> IwResult<()> {
        if !self.entities.delete_note(user_id, id).await? {
            return Err(IwError::NoteNotFound(id));
        }
        self.remove_embedding_best_effort(user_id, EntityKind::Note, id).await;
        Ok(())
    }

    // --- Bookmarks ---

    pub async fn create_bookmark(&self, bookmark: Bookmark) -> IwResult<Bookmark> {
        self.entities.insert_bookmark(&bookmark).await?;
        self.refresh_embedding_best_effort(
            &bookmark.user_id,
            EntityKind::Bookmark,
            bookmark.id,
            &bookmark.embedding_text(),
        )
        .await;
        Ok(bookmark)
    }

    pub async fn get_bookmark(&self, user_id: &str, id: Uuid) -> IwResult<Bookmark> {
        self.entities
            .get_bookmark(user_id, id)
            .await?
            .ok_or(IwError::BookmarkNotFound(id))
    }

    pub async fn list_bookmarks(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> IwResult<Vec<Bookmark>> {
        self.entities.list_bookmarks(user_id, limit, offset).await
    }

    pub async fn update_bookmark(
        &self,
        user_id: &str,
        id: Uuid,
        patch: BookmarkPatch,
    ) -> IwResult<Bookmark> {
        let mut bookmark = self.get_bookmark(user_id, id).await?;
        if let Some(title) = patch.title {
            bookmark.title = title;
        }
        if let Some(url) = patch.url {
            bookmark.url = url;
        }
        if let Some(description) = patch.description {
            bookmark.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if let Some(folder_id) = patch.folder_id {
            bookmark.folder_id = Some(folder_id);
        }
        bookmark.updated_at = Utc::now();

        if !self.entities.update_bookmark(&bookmark).await? {
            return Err(IwError::BookmarkNotFound(id));
        }
        self.refresh_embedding_best_effort(
            user_id,
            EntityKind::Bookmark,
            id,
            &bookmark.embedding_text(),
        )
        .await;
        Ok(bookmark)
    }

    pub async fn delete_bookmark(&self, user_id: &str, id: Uuid) -> IwResult<()> {
        if !self.entities.delete_bookmark(user_id, id).await? {
            return Err(IwError::BookmarkNotFound(id));
        }
        self.remove_embedding_best_effort(user_id, EntityKind::Bookmark, id)
            .await;
        Ok(())
    }
}
