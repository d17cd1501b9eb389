//! Fingerprint-keyed result cache with a stale-but-served tier.
//!
//! Entries are kept in the backing store for `ttl + stale_grace`. Within
//! `ttl` a read is [`CacheLookup::Fresh`]; after it, until the store expires
//! the key, the read is [`CacheLookup::Stale`] and callers may serve it only
//! when recomputation fails.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use iw_core::{Clock, IwError, IwResult, KvStore};

use crate::config::CacheConfig;

/// What a cached payload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Analysis,
    Embedding,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Embedding => "embedding",
        }
    }
}

/// Who produced a cached payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    Provider,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub source: CacheSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Fresh(CacheEntry<T>),
    Stale(CacheEntry<T>),
}

impl<T> CacheLookup<T> {
    pub fn fresh(self) -> Option<CacheEntry<T>> {
        match self {
            Self::Fresh(entry) => Some(entry),
            Self::Stale(_) => None,
        }
    }

    pub fn into_entry(self) -> CacheEntry<T> {
        match self {
            Self::Fresh(entry) | Self::Stale(entry) => entry,
        }
    }
}

pub struct ResultCache {
    store: Option<Arc<dyn KvStore>>,
    clock: Arc<dyn Clock>,
    stale_grace: Duration,
}

impl ResultCache {
    /// A cache without a backing store always misses and never writes.
    pub fn new(config: &CacheConfig, store: Option<Arc<dyn KvStore>>, clock: Arc<dyn Clock>) -> Self {
        let store = if config.enabled { store } else { None };
        Self {
            store,
            clock,
            stale_grace: Duration::from_secs(config.stale_grace_secs),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Look up a payload. Unreadable entries and store failures are misses.
    pub async fn get<T: DeserializeOwned>(
        &self,
        fingerprint: &str,
        purpose: Purpose,
    ) -> Option<CacheLookup<T>> {
        let store = self.store.as_ref()?;
        let key = cache_key(fingerprint, purpose);
        match self.read::<T>(store.as_ref(), &key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn read<T: DeserializeOwned>(
        &self,
        store: &dyn KvStore,
        key: &str,
    ) -> IwResult<Option<CacheLookup<T>>> {
        let Some(raw) = store.get(key).await? else {
            return Ok(None);
        };
        let entry: CacheEntry<T> = serde_json::from_str(&raw)?;
        if entry.expires_at > self.clock.now() {
            Ok(Some(CacheLookup::Fresh(entry)))
        } else {
            Ok(Some(CacheLookup::Stale(entry)))
        }
    }

    /// Store a payload for `ttl`.
    ///
    /// A fallback payload never replaces a fresh provider payload.
    pub async fn put<T: Serialize>(
        &self,
        fingerprint: &str,
        purpose: Purpose,
        payload: &T,
        source: CacheSource,
        ttl: Duration,
    ) {
        let Some(store) = &self.store else {
            return;
        };
        let key = cache_key(fingerprint, purpose);
        if let Err(e) = self.write(store.as_ref(), &key, payload, source, ttl).await {
            warn!(key = %key, error = %e, "cache write failed");
        }
    }

    async fn write<T: Serialize>(
        &self,
        store: &dyn KvStore,
        key: &str,
        payload: &T,
        source: CacheSource,
        ttl: Duration,
    ) -> IwResult<()> {
        if source == CacheSource::Fallback {
            let existing = self.read::<serde_json::Value>(store, key).await.ok().flatten();
            if let Some(CacheLookup::Fresh(entry)) = existing {
                if entry.source == CacheSource::Provider {
                    debug!(key, "keeping fresh provider entry over fallback result");
                    return Ok(());
                }
            }
        }

        let now = self.clock.now();
        let expires_at = now
            + chrono::Duration::from_std(ttl)
                .map_err(|e| IwError::Cache(format!("ttl out of range: {e}")))?;
        let entry = CacheEntry {
            payload,
            created_at: now,
            expires_at,
            source,
        };
        let raw = serde_json::to_string(&entry)?;
        store.set(key, &raw, Some(ttl + self.stale_grace)).await
    }
}

fn cache_key(fingerprint: &str, purpose: Purpose) -> String {
    format!("cache:{}:{fingerprint}", purpose.as_str())
}
