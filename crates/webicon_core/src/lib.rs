//! Favicon resolution for arbitrary page urls: canonicalize, consult a
//! durable cache, fetch and parse the page head, pick one icon, and fall back
//! to a service url or a stable colour when nothing usable turns up.

pub mod cache;
pub mod canonical;
pub mod config;
pub mod extract;
pub mod fallback;
pub mod fetch;
pub mod resolver;
pub mod runtime;
pub mod select;

pub use cache::{
    CacheError, MemoryResolutionCache, ResolutionCache, ResolvedIcons, SqliteResolutionCache,
};
pub use canonical::{CanonicalUrl, InvalidUrl, canonicalize};
pub use extract::{FaviconCandidate, FaviconType, IconSize, extract_favicons};
pub use fallback::{Color, display_icon_url, service_icon_url, stable_color};
pub use fetch::{FetchedPage, HttpPageFetcher, PageFetcher, TransportError};
pub use resolver::{FaviconResolver, Resolution, ResolutionSource, ResolveError, ResolveHandle};
pub use select::select_best;
