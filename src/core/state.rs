// Application state (AppState)

use crate::core::config::Config;
use crate::metrics::collector::Metrics;
use std::sync::Arc;

/// State shared between the pass loop and the status handlers
#[derive(Clone)]
pub struct AppState {
    /// Pass counters, written by the pass loop
    pub metrics: Arc<Metrics>,

    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            metrics: Arc::new(Metrics::new()),
            config: Arc::new(config),
        }
    }
}
