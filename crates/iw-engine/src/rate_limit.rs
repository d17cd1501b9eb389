//! Per-user request admission for AI analysis.
//!
//! Two gates must both pass: a fixed quota per window and a minimum spacing
//! between admitted requests. State lives entirely in the backing
//! [`KvStore`]; the limiter itself holds no per-user memory.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use iw_core::{Clock, IwResult, KvStore};

use crate::config::RateLimitConfig;

/// Which gate rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gate {
    Quota,
    Cooldown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// `remaining` is `None` when limiting is not enforced.
    Allowed { remaining: Option<u32> },
    Rejected { retry_after_secs: u64, gate: Gate },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn retry_after_secs(&self) -> u64 {
        match self {
            Self::Allowed { .. } => 0,
            Self::Rejected {
                retry_after_secs, ..
            } => *retry_after_secs,
        }
    }
}

/// Snapshot of a user's rate-limit state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateState {
    pub request_count: u32,
    pub window_expires_at: Option<DateTime<Utc>>,
    pub last_request_at: Option<DateTime<Utc>>,
}

pub struct RateLimiter {
    store: Option<Arc<dyn KvStore>>,
    clock: Arc<dyn Clock>,
    max_requests: u32,
    window: Duration,
    cooldown: Duration,
}

impl RateLimiter {
    /// A limiter without a backing store admits everything.
    pub fn new(
        config: &RateLimitConfig,
        store: Option<Arc<dyn KvStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = if config.enabled { store } else { None };
        Self {
            store,
            clock,
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }

    pub fn is_enforced(&self) -> bool {
        self.store.is_some()
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Check both gates and, when they pass, consume one unit of quota.
    ///
    /// Store failures open-fail: the request is admitted and a warning logged.
    pub async fn admit(&self, user_id: &str) -> Admission {
        let Some(store) = &self.store else {
            return Admission::Allowed { remaining: None };
        };
        match self.try_admit(store.as_ref(), user_id).await {
            Ok(admission) => {
                if let Admission::Rejected {
                    retry_after_secs,
                    gate,
                } = &admission
                {
                    debug!(user_id, ?gate, retry_after_secs, "rate limit rejected request");
                }
                admission
            }
            Err(e) => {
                warn!(user_id, error = %e, "rate limit store unavailable, admitting request");
                Admission::Allowed { remaining: None }
            }
        }
    }

    async fn try_admit(&self, store: &dyn KvStore, user_id: &str) -> IwResult<Admission> {
        let now = self.clock.now();
        let count_key = count_key(user_id);
        let last_key = last_key(user_id);

        let count = read_count(store, &count_key).await?;
        if count >= i64::from(self.max_requests) {
            return Ok(Admission::Rejected {
                retry_after_secs: self.window_remaining(store, &count_key).await?,
                gate: Gate::Quota,
            });
        }

        if let Some(last) = read_timestamp(store, &last_key).await? {
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.cooldown {
                return Ok(Admission::Rejected {
                    retry_after_secs: ceil_secs(self.cooldown - elapsed),
                    gate: Gate::Cooldown,
                });
            }
        }

        let n = store.incr(&count_key).await?;
        if n == 1 || store.ttl(&count_key).await?.is_none() {
            store.expire(&count_key, self.window).await?;
        }
        if n > i64::from(self.max_requests) {
            // Lost a race against a concurrent request for the last unit.
            return Ok(Admission::Rejected {
                retry_after_secs: self.window_remaining(store, &count_key).await?,
                gate: Gate::Quota,
            });
        }

        store
            .set(
                &last_key,
                &now.timestamp_millis().to_string(),
                Some(self.window.max(self.cooldown)),
            )
            .await?;

        let remaining = u32::try_from(i64::from(self.max_requests) - n).unwrap_or(0);
        Ok(Admission::Allowed {
            remaining: Some(remaining),
        })
    }

    async fn window_remaining(&self, store: &dyn KvStore, count_key: &str) -> IwResult<u64> {
        let ttl = store.ttl(count_key).await?.unwrap_or(self.window);
        Ok(ceil_secs(ttl).max(1))
    }

    /// Current state for `user_id`. Returns an empty state when not enforced.
    pub async fn state(&self, user_id: &str) -> IwResult<RateState> {
        let Some(store) = &self.store else {
            return Ok(RateState {
                request_count: 0,
                window_expires_at: None,
                last_request_at: None,
            });
        };
        let now = self.clock.now();
        let count_key = count_key(user_id);
        let count = read_count(store.as_ref(), &count_key).await?;
        let window_expires_at = store
            .ttl(&count_key)
            .await?
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl);
        Ok(RateState {
            request_count: u32::try_from(count).unwrap_or(u32::MAX),
            window_expires_at,
            last_request_at: read_timestamp(store.as_ref(), &last_key(user_id)).await?,
        })
    }
}

fn count_key(user_id: &str) -> String {
    format!("ratelimit:{user_id}:count")
}

fn last_key(user_id: &str) -> String {
    format!("ratelimit:{user_id}:last")
}

async fn read_count(store: &dyn KvStore, key: &str) -> IwResult<i64> {
    Ok(store
        .get(key)
        .await?
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0))
}

async fn read_timestamp(store: &dyn KvStore, key: &str) -> IwResult<Option<DateTime<Utc>>> {
    Ok(store
        .get(key)
        .await?
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single()))
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
