//! Origin-pull cache handler
//!
//! Materializes a missing static file: validate the path, fetch it from
//! origin, write it at its canonical place under the web root, and hand the
//! on-disk bytes back. The filesystem is the cache; a hit never reaches this
//! module because the front-end serves existing files itself.

pub mod error;
mod fetcher;
mod path;
mod store;


use std::path::PathBuf;
use std::time::{Duration, Instant};

use hyper::body::Bytes;

use crate::http::sniff_content_type;

pub use error::{ProxyError, Warning};
pub use fetcher::{FetchSettings, Fetcher, HttpFetcher};
pub use path::{OriginBase, RequestPath};
pub use store::{DiskStore, Store, StoreSettings};

/// Everything the pull-through handler needs, captured once at startup
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// `None` when no origin is configured: every pull answers 503
    pub origin: Option<OriginBase>,
    pub web_root: PathBuf,
    pub fetch: FetchSettings,
    pub store: StoreSettings,
}

/// A freshly written artifact, read back from disk
#[derive(Debug)]
pub struct Materialized {
    pub path: PathBuf,
    pub content_type: &'static str,
    pub body: Bytes,
    pub origin_time: Duration,
    pub warnings: Vec<Warning>,
}

/// The pull-through pipeline over injected fetch and store capabilities
pub struct PullThrough<F, S> {
    origin: Option<OriginBase>,
    web_root: PathBuf,
    fetcher: F,
    store: S,
}

impl<F: Fetcher, S: Store> PullThrough<F, S> {
    pub const fn new(origin: Option<OriginBase>, web_root: PathBuf, fetcher: F, store: S) -> Self {
        Self {
            origin,
            web_root,
            fetcher,
            store,
        }
    }

    /// Whether an origin is configured (readiness)
    pub const fn is_configured(&self) -> bool {
        self.origin.is_some()
    }

    /// The normalized origin base, if one is configured
    pub const fn origin(&self) -> Option<&OriginBase> {
        self.origin.as_ref()
    }

    /// Materialize the artifact for `raw_path` and return it.
    ///
    /// Path validation happens before any filesystem or network access; the
    /// origin is contacted only after the parent directory exists.
    pub async fn serve(&self, raw_path: &str) -> Result<Materialized, ProxyError> {
        let path = RequestPath::parse(raw_path)?;
        let origin = self.origin.as_ref().ok_or(ProxyError::NotConfigured)?;

        let placement = self.store.locate(&self.web_root, &path).await?;
        let parent = self.store.create_parent(&placement).await?;

        let url = origin.join(&path);
        let started = Instant::now();
        let data = self.fetcher.fetch(&url).await?;
        let origin_time = started.elapsed();

        let persisted = self
            .store
            .persist(&parent, &placement.file_name, data)
            .await?;
        let body = self.store.read(&persisted.path).await?;
        let content_type = sniff_content_type(&body);

        Ok(Materialized {
            path: persisted.path,
            content_type,
            body,
            origin_time,
            warnings: persisted.warnings,
        })
    }
}
