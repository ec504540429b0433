//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::net::session::SessionRegistry;
use crate::sim::SimStats;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub stats: Arc<SimStats>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.max_sessions));

        Self {
            config: Arc::new(config),
            registry,
            stats: Arc::new(SimStats::new()),
        }
    }
}
