//! Process-local key/value store with expiring keys.
//!
//! Backs rate-limit counters and the analysis/embedding result cache when no
//! external store is configured. Expiry is evaluated lazily against the
//! injected clock. Expired keys are dropped when touched, and every
//! [`SWEEP_EVERY_WRITES`] writes a full sweep removes the rest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use iw_core::{Clock, IwError, IwResult, KvStore, SystemClock};

pub const SWEEP_EVERY_WRITES: u64 = 256;

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    writes: AtomicU64,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            writes: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn deadline(&self, ttl: Duration) -> IwResult<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| IwError::Cache(format!("ttl out of range: {e}")))?;
        Ok(self.clock.now() + ttl)
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        purge(&mut self.lock(), now)
    }

    /// Count a write and sweep expired keys when one is due.
    fn note_write(&self, entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY_WRITES == 0 {
            let removed = purge(entries, now);
            if removed > 0 {
                tracing::debug!(removed, remaining = entries.len(), "swept expired keys");
            }
        }
    }

    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

fn purge(entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before - entries.len()
}

/// Look up a live entry, removing it if it has expired.
fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: DateTime<Utc>,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> IwResult<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Ok(live_entry(&mut entries, key, now).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> IwResult<()> {
        let expires_at = ttl.map(|ttl| self.deadline(ttl)).transpose()?;
        let now = self.clock.now();
        let mut entries = self.lock();
        self.note_write(&mut entries, now);
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> IwResult<i64> {
        let now = self.clock.now();
        let mut entries = self.lock();
        self.note_write(&mut entries, now);
        match live_entry(&mut entries, key, now) {
            Some(entry) => {
                let current: i64 = entry.value.parse().map_err(|_| {
                    IwError::Cache(format!("value at {key} is not an integer"))
                })?;
                let next = current + 1;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> IwResult<bool> {
        let deadline = self.deadline(ttl)?;
        let now = self.clock.now();
        let mut entries = self.lock();
        match live_entry(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(deadline);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> IwResult<Option<Duration>> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Ok(live_entry(&mut entries, key, now)
            .and_then(|e| e.expires_at)
            .and_then(|at| (at - now).to_std().ok()))
    }

    async fn delete(&self, key: &str) -> IwResult<bool> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let existed = live_entry(&mut entries, key, now).is_some();
        entries.remove(key);
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iw_core::ManualClock;

    fn store() -> (Arc<ManualClock>, InMemoryKvStore) {
        let clock = Arc::new(ManualClock::default());
        let store = InMemoryKvStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn set_with_ttl_expires() {
        let (clock, store) = store();
        store
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance_secs(9);
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(1)));

        clock.advance_secs(1);
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.ttl("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incr_creates_then_counts_and_keeps_ttl() {
        let (clock, store) = store();
        assert_eq!(store.incr("n").await.unwrap(), 1);
        assert!(store.expire("n", Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.incr("n").await.unwrap(), 2);
        assert_eq!(store.ttl("n").await.unwrap(), Some(Duration::from_secs(60)));

        clock.advance_secs(60);
        assert_eq!(store.incr("n").await.unwrap(), 1);
        assert!(store.ttl("n").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incr_rejects_non_integer_values() {
        let (_clock, store) = store();
        store.set("k", "text", None).await.unwrap();
        assert!(matches!(store.incr("k").await, Err(IwError::Cache(_))));
    }

    #[tokio::test]
    async fn expire_and_delete_report_absence() {
        let (_clock, store) = store();
        assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());
        assert!(!store.delete("missing").await.unwrap());
        store.set("k", "v", None).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn purge_drops_only_expired_keys() {
        let (clock, store) = store();
        store
            .set("short", "1", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        store.set("forever", "2", None).await.unwrap();
        clock.advance_secs(6);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn writes_sweep_expired_keys_without_manual_purge() {
        let (clock, store) = store();
        for i in 0..1000 {
            store
                .set(&format!("cache:{i}"), "payload", Some(Duration::from_secs(60)))
                .await
                .unwrap();
        }
        assert_eq!(store.lock().len(), 1000);

        clock.advance_secs(365 * 24 * 3600);
        for _ in 0..SWEEP_EVERY_WRITES {
            store.incr("rate:alice").await.unwrap();
        }
        assert_eq!(store.lock().len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_incr_is_atomic() {
        let store = Arc::new(InMemoryKvStore::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.incr("n").await.unwrap() }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=32).collect::<Vec<i64>>());
    }
}
