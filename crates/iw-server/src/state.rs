use std::sync::Arc;

use iw_engine::engine::InkwellEngine;

use crate::auth::AuthConfig;

/// Shared application state.
pub struct AppState {
    pub engine: Arc<InkwellEngine>,
    pub auth: AuthConfig,
}

impl AppState {
    /// Build state with auth settings read from the environment.
    pub fn new(engine: Arc<InkwellEngine>) -> Self {
        Self::with_auth(engine, AuthConfig::from_env())
    }

    pub fn with_auth(engine: Arc<InkwellEngine>, auth: AuthConfig) -> Self {
        Self { engine, auth }
    }
}
