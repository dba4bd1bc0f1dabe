use std::sync::Arc;

use super::config::RelayConfig;

/// Shared state for relay handlers.
#[derive(Clone)]
pub(super) struct RelayState {
    pub http: reqwest::Client,
    pub config: Arc<RelayConfig>,
}

impl RelayState {
    pub(super) fn new(config: RelayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: Arc::new(config),
        }
    }
}
