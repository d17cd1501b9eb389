//! AI analysis of note content: summary plus concept graph.
//!
//! Request order: validate, admit through the rate limiter, read the cache,
//! call the provider (summary and graph concurrently, each under a hard
//! timeout), then degrade per failed piece to a stale cache entry or the
//! local generator. Provider failures never surface as errors.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use iw_core::{AnalysisResult, ConceptGraph};

use crate::cache::{CacheLookup, CacheSource, Purpose, ResultCache};
use crate::config::EngineConfig;
use crate::fallback::LocalFallbackGenerator;
use crate::fingerprint::fingerprint;
use crate::llm::{llm_concept_graph, llm_summarize, LlmError, LlmProvider};
use crate::rate_limit::{Admission, Gate, RateLimiter};

pub const FALLBACK_NOTICE: &str =
    "AI analysis is currently unavailable, so this summary and concept map were generated locally.";
pub const STALE_NOTICE: &str =
    "AI analysis is currently unavailable, so a previously generated analysis is shown.";

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("content must not be empty")]
    InvalidContent,
    #[error("content is too long ({actual} characters, maximum {max})")]
    ContentTooLarge { max: usize, actual: usize },
    #[error("rate limit exceeded, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64, gate: Gate },
}

/// Where the returned analysis came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    Provider,
    Cache,
    StaleCache,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    pub notice: Option<String>,
    pub source: AnalysisSource,
    pub cached: bool,
    /// Quota left in the current window, when limiting is enforced.
    pub remaining: Option<u32>,
}

pub struct AnalysisOrchestrator {
    llm: Option<Arc<dyn LlmProvider>>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResultCache>,
    fallback: LocalFallbackGenerator,
    rng: Mutex<StdRng>,
    max_content_length: usize,
    max_concepts: usize,
    provider_timeout: Duration,
    analysis_ttl: Duration,
    fallback_ttl: Duration,
}

impl AnalysisOrchestrator {
    pub fn new(
        config: &EngineConfig,
        llm: Option<Arc<dyn LlmProvider>>,
        limiter: Arc<RateLimiter>,
        cache: Arc<ResultCache>,
        rng: StdRng,
    ) -> Self {
        Self {
            llm,
            limiter,
            cache,
            fallback: LocalFallbackGenerator::new(config.analysis.max_concepts),
            rng: Mutex::new(rng),
            max_content_length: config.analysis.max_content_length,
            max_concepts: config.analysis.max_concepts,
            provider_timeout: Duration::from_secs(config.llm.timeout_secs),
            analysis_ttl: Duration::from_secs(config.cache.analysis_ttl_secs),
            fallback_ttl: Duration::from_secs(config.cache.fallback_ttl_secs),
        }
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.llm.as_ref().map(|llm| llm.name())
    }

    pub fn validate(&self, content: &str) -> Result<(), AnalysisError> {
        if content.trim().is_empty() {
            return Err(AnalysisError::InvalidContent);
        }
        let actual = content.chars().count();
        if actual > self.max_content_length {
            return Err(AnalysisError::ContentTooLarge {
                max: self.max_content_length,
                actual,
            });
        }
        Ok(())
    }

    pub async fn analyze(
        &self,
        content: &str,
        user_id: &str,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        self.validate(content)?;

        // Admission runs before the cache read, so a cache hit still
        // consumes quota.
        let remaining = match self.limiter.admit(user_id).await {
            Admission::Allowed { remaining } => remaining,
            Admission::Rejected {
                retry_after_secs,
                gate,
            } => {
                return Err(AnalysisError::RateLimited {
                    retry_after_secs,
                    gate,
                })
            }
        };

        let key = fingerprint(content, Some(Purpose::Analysis.as_str()));
        let stale = match self.cache.get::<AnalysisResult>(&key, Purpose::Analysis).await {
            Some(CacheLookup::Fresh(entry)) => {
                debug!(user_id, fingerprint = %key, "analysis cache hit");
                let notice = (entry.source == CacheSource::Fallback)
                    .then(|| FALLBACK_NOTICE.to_string());
                return Ok(AnalysisOutcome {
                    result: entry.payload,
                    notice,
                    source: AnalysisSource::Cache,
                    cached: true,
                    remaining,
                });
            }
            Some(CacheLookup::Stale(entry)) => Some(entry),
            None => None,
        };

        let (summary, graph) = self.call_provider(content).await;
        let mut used_stale = false;
        let mut used_local = false;

        let summary = match summary {
            Ok(summary) => summary,
            Err(e) => {
                warn!(user_id, kind = ?e.kind(), error = %e, "summary generation failed");
                match &stale {
                    Some(entry) => {
                        used_stale = true;
                        entry.payload.summary.clone()
                    }
                    None => {
                        used_local = true;
                        self.fallback.summarize(content)
                    }
                }
            }
        };

        let concept_graph = match graph {
            Ok(graph) => graph,
            Err(e) => {
                warn!(user_id, kind = ?e.kind(), error = %e, "concept graph generation failed");
                match &stale {
                    Some(entry) => {
                        used_stale = true;
                        entry.payload.concept_graph.clone()
                    }
                    None => {
                        used_local = true;
                        self.local_graph(content)
                    }
                }
            }
        };

        let result = AnalysisResult {
            summary,
            concept_graph,
        };

        let source = if used_local {
            AnalysisSource::Fallback
        } else if used_stale {
            AnalysisSource::StaleCache
        } else {
            AnalysisSource::Provider
        };

        match source {
            AnalysisSource::Provider => {
                self.cache
                    .put(&key, Purpose::Analysis, &result, CacheSource::Provider, self.analysis_ttl)
                    .await;
            }
            AnalysisSource::Fallback if stale.is_none() => {
                info!(user_id, fingerprint = %key, "caching locally generated analysis");
                self.cache
                    .put(&key, Purpose::Analysis, &result, CacheSource::Fallback, self.fallback_ttl)
                    .await;
            }
            _ => {}
        }

        let notice = match source {
            AnalysisSource::Provider | AnalysisSource::Cache => None,
            AnalysisSource::StaleCache => Some(STALE_NOTICE.to_string()),
            AnalysisSource::Fallback => Some(FALLBACK_NOTICE.to_string()),
        };

        Ok(AnalysisOutcome {
            result,
            notice,
            source,
            cached: matches!(source, AnalysisSource::StaleCache),
            remaining,
        })
    }

    /// Run the summary and graph calls concurrently, each under the timeout.
    async fn call_provider(
        &self,
        content: &str,
    ) -> (Result<String, LlmError>, Result<ConceptGraph, LlmError>) {
        let Some(llm) = &self.llm else {
            return (Err(LlmError::NotConfigured), Err(LlmError::NotConfigured));
        };
        let summary = tokio::time::timeout(self.provider_timeout, llm_summarize(llm.as_ref(), content));
        let graph = tokio::time::timeout(
            self.provider_timeout,
            llm_concept_graph(llm.as_ref(), content, self.max_concepts),
        );
        let (summary, graph) = futures::future::join(summary, graph).await;
        (
            summary.unwrap_or(Err(LlmError::Timeout)),
            graph.unwrap_or(Err(LlmError::Timeout)),
        )
    }

    fn local_graph(&self, content: &str) -> ConceptGraph {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        self.fallback.concept_graph(content, &mut *rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, RateLimitConfig};
    use crate::test_utils::{BrokenKvStore, Script, ScriptedLlm, SCRIPTED_SUMMARY};
    use iw_core::{KvStore, ManualClock};
    use iw_storage::InMemoryKvStore;
    use rand::SeedableRng;

    struct Harness {
        clock: Arc<ManualClock>,
        llm: Arc<ScriptedLlm>,
        orchestrator: AnalysisOrchestrator,
    }

    fn harness_with(llm: ScriptedLlm, rate_limit: RateLimitConfig) -> Harness {
        let clock = Arc::new(ManualClock::default());
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::with_clock(clock.clone()));
        let config = EngineConfig {
            rate_limit: rate_limit.clone(),
            ..EngineConfig::default()
        };
        let limiter = Arc::new(RateLimiter::new(&rate_limit, Some(kv.clone()), clock.clone()));
        let cache = Arc::new(ResultCache::new(&config.cache, Some(kv), clock.clone()));
        let llm = Arc::new(llm);
        let orchestrator = AnalysisOrchestrator::new(
            &config,
            Some(llm.clone()),
            limiter,
            cache,
            StdRng::seed_from_u64(42),
        )
        .with_provider_timeout(Duration::from_millis(100));
        Harness {
            clock,
            llm,
            orchestrator,
        }
    }

    fn harness(llm: ScriptedLlm) -> Harness {
        harness_with(
            llm,
            RateLimitConfig {
                cooldown_secs: 0,
                ..RateLimitConfig::default()
            },
        )
    }

    const NOTE: &str = "Rust ownership rules prevent data races at compile time.";

    #[tokio::test]
    async fn empty_content_is_a_client_error() {
        let h = harness(ScriptedLlm::healthy());
        assert!(matches!(
            h.orchestrator.analyze("", "alice").await,
            Err(AnalysisError::InvalidContent)
        ));
        assert!(matches!(
            h.orchestrator.analyze("   \n", "alice").await,
            Err(AnalysisError::InvalidContent)
        ));
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn oversized_content_is_rejected_before_admission() {
        let h = harness(ScriptedLlm::healthy());
        let err = h
            .orchestrator
            .analyze(&"a".repeat(10_001), "alice")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::ContentTooLarge {
                max: 10_000,
                actual: 10_001
            }
        ));
        assert!(h.orchestrator.analyze(&"a".repeat(10_000), "alice").await.is_ok());
    }

    #[tokio::test]
    async fn provider_output_is_returned_and_cached() {
        let h = harness(ScriptedLlm::healthy());
        let first = h.orchestrator.analyze(NOTE, "alice").await.unwrap();
        assert_eq!(first.source, AnalysisSource::Provider);
        assert_eq!(first.result.summary, SCRIPTED_SUMMARY);
        assert_eq!(first.result.concept_graph.concepts.len(), 2);
        assert!(first.notice.is_none());
        assert!(!first.cached);
        assert_eq!(h.llm.calls(), 2);

        let second = h.orchestrator.analyze(NOTE, "alice").await.unwrap();
        assert_eq!(second.source, AnalysisSource::Cache);
        assert!(second.cached);
        assert_eq!(second.result, first.result);
        assert_eq!(h.llm.calls(), 2);
    }

    #[tokio::test]
    async fn cache_hit_still_consumes_quota() {
        let h = harness(ScriptedLlm::healthy());
        let first = h.orchestrator.analyze(NOTE, "alice").await.unwrap();
        let second = h.orchestrator.analyze(NOTE, "alice").await.unwrap();
        assert_eq!(first.remaining, Some(9));
        assert_eq!(second.remaining, Some(8));
    }

    #[tokio::test]
    async fn eleventh_request_is_rate_limited() {
        let h = harness(ScriptedLlm::healthy());
        for i in 0..10 {
            h.orchestrator
                .analyze(&format!("{NOTE} #{i}"), "alice")
                .await
                .unwrap();
        }
        let calls = h.llm.calls();
        match h.orchestrator.analyze(NOTE, "alice").await {
            Err(AnalysisError::RateLimited {
                retry_after_secs,
                gate: Gate::Quota,
            }) => assert_eq!(retry_after_secs, 3600),
            other => panic!("expected rate limit, got {other:?}"),
        }
        assert_eq!(h.llm.calls(), calls);
    }

    #[tokio::test]
    async fn cooldown_rejects_rapid_requests() {
        let h = harness_with(ScriptedLlm::healthy(), RateLimitConfig::default());
        h.orchestrator.analyze(NOTE, "alice").await.unwrap();
        let err = h.orchestrator.analyze(NOTE, "alice").await.unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::RateLimited {
                gate: Gate::Cooldown,
                ..
            }
        ));
        h.clock.advance_secs(10);
        assert!(h.orchestrator.analyze(NOTE, "alice").await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_store_still_yields_analysis() {
        let clock = Arc::new(ManualClock::default());
        let kv: Arc<dyn KvStore> = Arc::new(BrokenKvStore);
        let config = EngineConfig::default();
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit, Some(kv.clone()), clock.clone()));
        let cache = Arc::new(ResultCache::new(&config.cache, Some(kv), clock));
        let llm = Arc::new(ScriptedLlm::healthy());
        let orchestrator = AnalysisOrchestrator::new(
            &config,
            Some(llm.clone()),
            limiter,
            cache,
            StdRng::seed_from_u64(7),
        );

        for _ in 0..2 {
            let outcome = orchestrator.analyze(NOTE, "alice").await.unwrap();
            assert_eq!(outcome.source, AnalysisSource::Provider);
            assert_eq!(outcome.remaining, None);
            assert!(!outcome.cached);
        }
        assert_eq!(llm.calls(), 4);
    }

    #[tokio::test]
    async fn timeout_degrades_to_local_analysis() {
        let h = harness(ScriptedLlm::stalling(Duration::from_secs(5)));
        let outcome = h.orchestrator.analyze(NOTE, "alice").await.unwrap();
        assert_eq!(outcome.source, AnalysisSource::Fallback);
        assert_eq!(outcome.notice.as_deref(), Some(FALLBACK_NOTICE));
        assert!(!outcome.result.summary.is_empty());
        assert!(outcome.result.concept_graph.is_referentially_intact());
    }

    #[tokio::test]
    async fn pieces_fail_independently() {
        let llm = ScriptedLlm::healthy();
        llm.set_graph(Script::Malformed);
        let h = harness(llm);
        let outcome = h.orchestrator.analyze(NOTE, "alice").await.unwrap();
        assert_eq!(outcome.result.summary, SCRIPTED_SUMMARY);
        assert_eq!(outcome.source, AnalysisSource::Fallback);
        assert!(outcome.notice.is_some());
        // "ownership", "rules", "prevent", ... from the local generator.
        assert!(outcome
            .result
            .concept_graph
            .concepts
            .iter()
            .any(|c| c.id == "ownership"));
    }

    #[tokio::test]
    async fn fallback_result_is_cached_with_notice() {
        let h = harness(ScriptedLlm::failing());
        let first = h.orchestrator.analyze(NOTE, "alice").await.unwrap();
        assert_eq!(h.llm.calls(), 2);
        let second = h.orchestrator.analyze(NOTE, "alice").await.unwrap();
        assert_eq!(second.source, AnalysisSource::Cache);
        assert_eq!(second.notice.as_deref(), Some(FALLBACK_NOTICE));
        assert_eq!(second.result, first.result);
        assert_eq!(h.llm.calls(), 2);
    }

    #[tokio::test]
    async fn provider_result_replaces_expired_fallback() {
        let h = harness(ScriptedLlm::failing());
        h.orchestrator.analyze(NOTE, "alice").await.unwrap();

        h.clock.advance_secs(3600);
        h.llm.set_summary(Script::Reply(SCRIPTED_SUMMARY.into()));
        h.llm.set_graph(Script::Reply(crate::test_utils::SCRIPTED_GRAPH.into()));
        let outcome = h.orchestrator.analyze(NOTE, "alice").await.unwrap();
        assert_eq!(outcome.source, AnalysisSource::Provider);

        let cached = h.orchestrator.analyze(NOTE, "alice").await.unwrap();
        assert_eq!(cached.source, AnalysisSource::Cache);
        assert!(cached.notice.is_none());
    }

    #[tokio::test]
    async fn stale_entry_is_served_when_provider_fails() {
        let h = harness(ScriptedLlm::healthy());
        let fresh = h.orchestrator.analyze(NOTE, "alice").await.unwrap();

        h.clock.advance_secs(24 * 3600 + 1);
        h.llm.set_summary(Script::Fail);
        h.llm.set_graph(Script::Fail);
        let outcome = h.orchestrator.analyze(NOTE, "alice").await.unwrap();
        assert_eq!(outcome.source, AnalysisSource::StaleCache);
        assert_eq!(outcome.notice.as_deref(), Some(STALE_NOTICE));
        assert_eq!(outcome.result, fresh.result);
    }

    #[tokio::test]
    async fn fallback_never_fails_for_any_valid_content() {
        let h = harness_with(
            ScriptedLlm::failing(),
            RateLimitConfig {
                enabled: false,
                ..RateLimitConfig::default()
            },
        );
        let inputs = [
            "x".to_string(),
            "!!! ??? ...".to_string(),
            "a b c d".to_string(),
            "Ünïcödé wörds everywhere".to_string(),
            "word ".repeat(2000),
            "z".repeat(10_000),
        ];
        for content in &inputs {
            let outcome = h.orchestrator.analyze(content, "alice").await.unwrap();
            assert!(!outcome.result.summary.is_empty());
            assert!(outcome.result.concept_graph.is_referentially_intact());
            assert!(outcome.notice.is_some());
        }
    }

    #[tokio::test]
    async fn missing_provider_uses_local_analysis() {
        let clock = Arc::new(ManualClock::default());
        let config = EngineConfig::default();
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit, None, clock.clone()));
        let cache = Arc::new(ResultCache::new(&config.cache, None, clock));
        let orchestrator =
            AnalysisOrchestrator::new(&config, None, limiter, cache, StdRng::seed_from_u64(1));
        let outcome = orchestrator.analyze(NOTE, "alice").await.unwrap();
        assert_eq!(outcome.source, AnalysisSource::Fallback);
        assert_eq!(outcome.remaining, None);
        assert!(orchestrator.provider_name().is_none());
    }

    #[tokio::test]
    async fn identical_content_is_analyzed_once_across_users() {
        let h = harness(ScriptedLlm::healthy());
        h.orchestrator.analyze(NOTE, "alice").await.unwrap();
        let other = h.orchestrator.analyze(NOTE, "bob").await.unwrap();
        assert_eq!(other.source, AnalysisSource::Cache);
        assert_eq!(h.llm.calls(), 2);
    }

    #[test]
    fn cache_config_defaults_separate_fallback_ttl() {
        let config = CacheConfig::default();
        assert!(config.fallback_ttl_secs < config.analysis_ttl_secs);
    }
}
