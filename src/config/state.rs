// Application state module
// Immutable state shared by every connection

use std::sync::Arc;

use super::types::Config;
use crate::proxy::{DiskStore, HttpFetcher, PullThrough};

/// The pull-through handler wired to its production adapters
pub type OriginPull = PullThrough<HttpFetcher, DiskStore>;

/// Application state
pub struct AppState {
    pub config: Config,
    pub proxy: Arc<OriginPull>,
}

impl AppState {
    /// Capture the configuration and build the origin client.
    ///
    /// Called once at startup; nothing here is re-read per request.
    pub fn new(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let settings = config.proxy_settings()?;
        let fetcher = HttpFetcher::new(&settings.fetch)?;
        let store = DiskStore::new(settings.store.clone());
        let proxy = PullThrough::new(settings.origin, settings.web_root, fetcher, store);

        Ok(Self {
            config: config.clone(),
            proxy: Arc::new(proxy),
        })
    }
}
