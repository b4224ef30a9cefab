use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{ResolutionCache, ResolvedIcons};
use crate::canonical::{CanonicalUrl, InvalidUrl, canonicalize};
use crate::config::FetchConfig;
use crate::extract::extract_favicons;
use crate::fetch::{HttpPageFetcher, PageFetcher, TransportError};
use crate::select::select_best;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache,
    Network,
}

impl ResolutionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Network => "network",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub page_url: CanonicalUrl,
    pub icons: ResolvedIcons,
    pub source: ResolutionSource,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] InvalidUrl),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Canonicalize, consult the cache, and on a miss fetch the page, extract and
/// select an icon, then store the selection.
pub struct FaviconResolver {
    fetcher: Arc<dyn PageFetcher>,
    cache: Arc<dyn ResolutionCache>,
}

impl FaviconResolver {
    pub fn new(fetcher: Arc<dyn PageFetcher>, cache: Arc<dyn ResolutionCache>) -> Self {
        Self { fetcher, cache }
    }

    pub fn with_http(
        config: &FetchConfig,
        cache: Arc<dyn ResolutionCache>,
    ) -> Result<Self, TransportError> {
        let fetcher = HttpPageFetcher::new(config)?;
        Ok(Self::new(Arc::new(fetcher), cache))
    }

    /// Resolve `raw_url` to zero or one favicon urls. Never fails; an empty
    /// vector means no favicon was found.
    pub fn resolve(&self, raw_url: &str) -> Vec<String> {
        match self.try_resolve(raw_url) {
            Ok(resolution) => resolution.icons.into_vec(),
            Err(err) => {
                debug!(input = raw_url, error = %err, "favicon resolution failed");
                Vec::new()
            }
        }
    }

    pub fn try_resolve(&self, raw_url: &str) -> Result<Resolution, ResolveError> {
        let page_url = canonicalize(raw_url)?;

        if let Some(icons) = self.cached(&page_url) {
            debug!(page_url = %page_url, icons = icons.len(), "favicon cache hit");
            return Ok(Resolution {
                page_url,
                icons,
                source: ResolutionSource::Cache,
            });
        }

        let page = self.fetcher.fetch(&page_url).inspect_err(|err| {
            warn!(page_url = %page_url, error = %err, "page fetch failed");
        })?;
        let candidates = extract_favicons(&page.body, &page.final_url);
        let icons = select_best(&candidates)
            .map(|best| ResolvedIcons::single(best.url.to_string()))
            .unwrap_or_default();
        debug!(
            page_url = %page_url,
            final_url = %page.final_url,
            candidates = candidates.len(),
            selected = icons.first().unwrap_or("<none>"),
            "resolved favicon from markup"
        );

        self.store(&page_url, &icons);
        Ok(Resolution {
            page_url,
            icons,
            source: ResolutionSource::Network,
        })
    }

    /// Run [`FaviconResolver::resolve`] on a worker thread. The result is sent
    /// once; dropping the handle does not stop the worker, so the cache is
    /// still populated.
    pub fn spawn_resolve(self: &Arc<Self>, raw_url: impl Into<String>) -> ResolveHandle {
        let (sender, receiver) = mpsc::channel();
        let resolver = Arc::clone(self);
        let raw_url = raw_url.into();
        let spawned = thread::Builder::new()
            .name("webicon-resolve".to_string())
            .spawn(move || {
                let icons = resolver.resolve(&raw_url);
                let _ = sender.send(icons);
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to spawn favicon resolution worker");
        }
        ResolveHandle { receiver }
    }

    fn cached(&self, page_url: &CanonicalUrl) -> Option<ResolvedIcons> {
        match self.cache.get(page_url) {
            Ok(icons) => icons,
            Err(err) => {
                warn!(page_url = %page_url, error = %err, "favicon cache read failed; fetching");
                None
            }
        }
    }

    fn store(&self, page_url: &CanonicalUrl, icons: &ResolvedIcons) {
        if let Err(err) = self.cache.put(page_url, icons) {
            warn!(page_url = %page_url, error = %err, "favicon cache write failed");
        }
    }
}

/// Pending result of [`FaviconResolver::spawn_resolve`].
pub struct ResolveHandle {
    receiver: Receiver<Vec<String>>,
}

impl ResolveHandle {
    pub fn wait(self) -> Vec<String> {
        self.receiver.recv().unwrap_or_default()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Vec<String>> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn try_take(&self) -> Option<Vec<String>> {
        self.receiver.try_recv().ok()
    }
}
