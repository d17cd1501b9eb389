pub mod analyze;
pub mod config;
pub mod serve;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use iw_engine::config::EngineConfig;

/// Everything the binary reads from the config file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub server: ServerRuntimeConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerRuntimeConfig {
    pub bind_host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        let defaults = iw_server::ServerConfig::default();
        Self {
            bind_host: defaults.bind_host,
            port: defaults.port,
            cors_allowed_origins: defaults.cors_allowed_origins,
        }
    }
}

/// Load the TOML config file (if present), then layer `INKWELL_*`
/// environment overrides on top.
pub fn load_runtime_config(config_path: &str) -> anyhow::Result<RuntimeConfig> {
    let mut runtime = read_config_file(config_path)?;
    runtime.engine.apply_env_overrides();
    if let Some(host) = env_non_empty("INKWELL_BIND_HOST") {
        runtime.server.bind_host = host;
    }
    if let Some(port) = env_non_empty("INKWELL_PORT").and_then(|p| p.parse().ok()) {
        runtime.server.port = port;
    }
    Ok(runtime)
}

fn read_config_file(config_path: &str) -> anyhow::Result<RuntimeConfig> {
    let path = shellexpand(config_path);
    if !std::path::Path::new(&path).exists() {
        return Ok(RuntimeConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {path}"))?;
    let mut runtime: RuntimeConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse TOML config {path}"))?;
    runtime.engine.data_dir = shellexpand(&runtime.engine.data_dir);
    Ok(runtime)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn shellexpand(s: &str) -> String {
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
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let runtime = read_config_file("/nonexistent/inkwell/config.toml").unwrap();
        assert_eq!(runtime.server.port, 9480);
        assert_eq!(runtime.engine.rate_limit.max_requests, 10);
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 8088

[engine]
data_dir = "/srv/inkwell"

[engine.rate_limit]
max_requests = 25

[engine.llm]
enabled = true
model = "local-model"
"#
        )
        .unwrap();

        let runtime = read_config_file(&file.path().to_string_lossy()).unwrap();
        assert_eq!(runtime.server.port, 8088);
        assert_eq!(runtime.server.bind_host, "127.0.0.1");
        assert_eq!(runtime.engine.data_dir, "/srv/inkwell");
        assert_eq!(runtime.engine.rate_limit.max_requests, 25);
        assert_eq!(runtime.engine.rate_limit.window_secs, 3600);
        assert!(runtime.engine.llm.enabled);
        assert_eq!(runtime.engine.llm.model, "local-model");
    }

    #[test]
    fn malformed_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        let err = read_config_file(&file.path().to_string_lossy()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse TOML config"));
    }
}
