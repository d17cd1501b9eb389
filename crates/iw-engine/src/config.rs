use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data_dir: String,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub analysis: AnalysisConfig,
    pub search: SearchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: shellexpand("~/.inkwell/data"),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            analysis: AnalysisConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Layer `INKWELL_*` environment variables over the current values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_string("INKWELL_DATA_DIR") {
            self.data_dir = shellexpand(&dir);
        }

        if let Some(enabled) = env_bool("INKWELL_LLM_ENABLED") {
            self.llm.enabled = enabled;
        }
        if let Some(url) = env_string("INKWELL_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = env_string("INKWELL_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = env_string("INKWELL_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(secs) = env_parse("INKWELL_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = secs;
        }

        if let Some(provider) = env_string("INKWELL_EMBEDDING_PROVIDER") {
            self.embedding.provider = provider;
        }
        if let Some(model) = env_string("INKWELL_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(url) = env_string("INKWELL_EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(url);
        }

        if let Some(enabled) = env_bool("INKWELL_RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = enabled;
        }
        if let Some(max) = env_parse("INKWELL_RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limit.max_requests = max;
        }
        if let Some(secs) = env_parse("INKWELL_RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = secs;
        }
        if let Some(secs) = env_parse("INKWELL_RATE_LIMIT_COOLDOWN_SECS") {
            self.rate_limit.cooldown_secs = secs;
        }

        if let Some(enabled) = env_bool("INKWELL_CACHE_ENABLED") {
            self.cache.enabled = enabled;
        }
    }
}

/// Per-user request budget for AI analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Admitted requests per window.
    pub max_requests: u32,
    pub window_secs: u64,
    /// Minimum spacing between two admitted requests.
    pub cooldown_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 10,
            window_secs: 3600,
            cooldown_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub analysis_ttl_secs: u64,
    pub embedding_ttl_secs: u64,
    /// TTL for results produced by the local fallback generator.
    pub fallback_ttl_secs: u64,
    /// How long an expired entry stays readable as a stale fallback.
    pub stale_grace_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            analysis_ttl_secs: 24 * 3600,
            embedding_ttl_secs: 7 * 24 * 3600,
            fallback_ttl_secs: 3600,
            stale_grace_secs: 7 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Hard timeout for a single provider call.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key: None,
            max_tokens: 1024,
            temperature: 0.3,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"openai"` for an OpenAI-compatible `/embeddings` endpoint, `"local"`
    /// for the feature-hashing embedder.
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    /// Base URL for OpenAI-compatible embedding APIs. Defaults to the LLM base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Maximum content length in characters.
    pub max_content_length: usize,
    pub max_concepts: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_content_length: 10_000,
            max_concepts: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub similarity_threshold: f64,
    pub result_limit: usize,
    /// Candidate rows fetched per kind for text matching.
    pub text_candidate_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.45,
            result_limit: 10,
            text_candidate_limit: 50,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn shellexpand(s: &str) -> String {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window_secs, 3600);
        assert_eq!(config.rate_limit.cooldown_secs, 10);
        assert_eq!(config.cache.analysis_ttl_secs, 86_400);
        assert_eq!(config.cache.embedding_ttl_secs, 604_800);
        assert_eq!(config.llm.timeout_secs, 20);
        assert_eq!(config.analysis.max_content_length, 10_000);
        assert_eq!(config.analysis.max_concepts, 10);
        assert_eq!(config.search.similarity_threshold, 0.45);
        assert_eq!(config.search.result_limit, 10);
        assert_eq!(config.embedding.dimensions, 1536);
    }

    #[test]
    fn partial_config_fills_missing_sections() {
        let json = r#"{"data_dir":"/tmp/inkwell","rate_limit":{"enabled":false,"max_requests":3,"window_secs":60,"cooldown_secs":0}}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.max_requests, 3);
        assert!(config.cache.enabled);
        assert_eq!(config.search.result_limit, 10);
    }

    #[test]
    fn partial_section_keeps_field_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"rate_limit":{"max_requests":3}}"#).unwrap();
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.rate_limit.cooldown_secs, 10);
        assert!(config.data_dir.ends_with(".inkwell/data"));
    }

    #[test]
    fn shellexpand_leaves_absolute_paths() {
        assert_eq!(shellexpand("/var/lib/inkwell"), "/var/lib/inkwell");
    }
}
