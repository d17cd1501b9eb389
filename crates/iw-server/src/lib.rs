pub mod auth;
pub mod rest;
pub mod state;
pub mod validation;

use std::sync::Arc;

use iw_engine::config::EngineConfig;
use iw_engine::engine::InkwellEngine;
use state::AppState;

const DEFAULT_LOG_FILTER: &str = "info,iw_server=debug,iw_engine=debug";

pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub engine_config: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".into(),
            port: 9480,
            cors_allowed_origins: Vec::new(),
            engine_config: EngineConfig::default(),
        }
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Safe to call more than once.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Start the Inkwell REST server and serve until the listener fails.
pub async fn start_server(
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    tracing::info!("initializing Inkwell engine...");
    let engine = InkwellEngine::init(config.engine_config).await?;
    let state = Arc::new(AppState::new(Arc::new(engine)));
    if !state.auth.is_enabled() {
        tracing::warn!(
            "neither INKWELL_JWT_SECRET nor INKWELL_DEV_USER is set; protected routes will answer 401"
        );
    }

    let app = rest::create_router_with_cors(state, &config.cors_allowed_origins);
    let addr = format!("{}:{}", config.bind_host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("REST API listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
