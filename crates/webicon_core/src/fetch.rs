use std::io::Read;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::debug;

use crate::canonical::CanonicalUrl;
use crate::config::FetchConfig;

const ACCEPT_MARKUP: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// A fetched page. `final_url` is the url after redirects and is the base for
/// resolving relative icon links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub final_url: Url,
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unsupported scheme for fetch: {0}")]
    UnsupportedScheme(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("failed to fetch {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} while fetching {url}")]
    Status { url: String, status: u16 },
    #[error("failed to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

pub trait PageFetcher: Send + Sync {
    fn fetch(&self, url: &CanonicalUrl) -> Result<FetchedPage, TransportError>;
}

pub struct HttpPageFetcher {
    client: Client,
    user_agent: String,
    max_bytes: usize,
    strict_status: bool,
}

impl HttpPageFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(Policy::limited(config.max_redirects))
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            strict_status: config.strict_status,
        })
    }
}

impl PageFetcher for HttpPageFetcher {
    fn fetch(&self, url: &CanonicalUrl) -> Result<FetchedPage, TransportError> {
        let target = url.as_url();
        if !matches!(target.scheme(), "http" | "https") {
            return Err(TransportError::UnsupportedScheme(
                target.scheme().to_string(),
            ));
        }

        debug!(page_url = %target, "fetching page markup");
        let response = self
            .client
            .get(target.clone())
            .header(USER_AGENT, self.user_agent.as_str())
            .header(ACCEPT, ACCEPT_MARKUP)
            .send()
            .map_err(|source| TransportError::Request {
                url: target.to_string(),
                source,
            })?;

        let status = response.status();
        let final_url = response.url().clone();
        if self.strict_status && !status.is_success() {
            return Err(TransportError::Status {
                url: final_url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut body = Vec::new();
        response
            .take(self.max_bytes as u64)
            .read_to_end(&mut body)
            .map_err(|source| TransportError::Body {
                url: final_url.to_string(),
                source,
            })?;
        debug!(
            page_url = %target,
            final_url = %final_url,
            status = status.as_u16(),
            bytes = body.len(),
            "fetched page markup"
        );

        Ok(FetchedPage {
            final_url,
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::time::Duration;

    use super::{HttpPageFetcher, PageFetcher, TransportError};
    use crate::canonical::canonicalize;
    use crate::config::FetchConfig;
    use crate::extract::extract_favicons;

    fn fetcher(config: FetchConfig) -> HttpPageFetcher {
        HttpPageFetcher::new(&config).expect("http fetcher")
    }

    #[test]
    fn follows_redirects_and_reports_final_url() {
        let mut server = mockito::Server::new();
        let redirect = server
            .mock("GET", "/old")
            .with_status(301)
            .with_header("location", "/new/home")
            .create();
        let page = server
            .mock("GET", "/new/home")
            .match_header("user-agent", "webicon-test/1.0")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<head><link rel=icon href=a.png></head>")
            .create();

        let fetcher = fetcher(FetchConfig {
            user_agent: "webicon-test/1.0".to_string(),
            ..FetchConfig::default()
        });
        let url = canonicalize(&format!("{}/old", server.url())).expect("canonical");
        let fetched = fetcher.fetch(&url).expect("fetch");

        redirect.assert();
        page.assert();
        assert_eq!(fetched.status, 200);
        assert_eq!(fetched.final_url.path(), "/new/home");
        assert!(String::from_utf8_lossy(&fetched.body).contains("a.png"));
    }

    #[test]
    fn error_status_bodies_are_kept_unless_strict() {
        let mut server = mockito::Server::new();
        let _missing = server
            .mock("GET", "/")
            .with_status(404)
            .with_body("<head><link rel=icon href=/404.png></head>")
            .expect(2)
            .create();
        let url = canonicalize(&server.url()).expect("canonical");

        let permissive = fetcher(FetchConfig::default());
        let fetched = permissive.fetch(&url).expect("permissive fetch");
        assert_eq!(fetched.status, 404);
        assert!(!fetched.body.is_empty());

        let strict = fetcher(FetchConfig {
            strict_status: true,
            ..FetchConfig::default()
        });
        let err = strict.fetch(&url).expect_err("strict fetch must fail");
        assert!(matches!(err, TransportError::Status { status: 404, .. }));
    }

    #[test]
    fn body_is_truncated_to_max_bytes() {
        let mut server = mockito::Server::new();
        let _page = server
            .mock("GET", "/")
            .with_status(200)
            .with_body("x".repeat(4096))
            .create();
        let url = canonicalize(&server.url()).expect("canonical");
        let fetched = fetcher(FetchConfig {
            max_bytes: 100,
            ..FetchConfig::default()
        })
        .fetch(&url)
        .expect("fetch");
        assert_eq!(fetched.body.len(), 100);
    }

    #[test]
    fn cap_inside_a_character_still_yields_utf8_links() {
        let html = "<head><title>Café</title><link rel=\"icon\" href=\"/café.png\"></head><p>é</p>";
        let split_at = html.rfind('é').expect("trailing char") + 1;
        let mut server = mockito::Server::new();
        let _page = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(html)
            .create();
        let url = canonicalize(&server.url()).expect("canonical");

        let fetched = fetcher(FetchConfig {
            max_bytes: split_at,
            ..FetchConfig::default()
        })
        .fetch(&url)
        .expect("fetch");
        assert_eq!(fetched.body.len(), split_at);

        let candidates = extract_favicons(&fetched.body, &fetched.final_url);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url.path(), "/caf%C3%A9.png");
    }

    #[test]
    fn unresponsive_servers_time_out_as_transport_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
        let addr = listener.local_addr().expect("listener addr");
        let url = canonicalize(&format!("http://{addr}/")).expect("canonical");

        let err = fetcher(FetchConfig {
            timeout: Duration::from_millis(200),
            ..FetchConfig::default()
        })
        .fetch(&url)
        .expect_err("must time out");
        match err {
            TransportError::Request { source, .. } => assert!(source.is_timeout()),
            other => panic!("unexpected error: {other}"),
        }
        drop(listener);
    }

    #[test]
    fn non_http_schemes_are_rejected_without_io() {
        let url = canonicalize("ftp://files.example.org/pub").expect("canonical");
        let err = fetcher(FetchConfig::default())
            .fetch(&url)
            .expect_err("must fail");
        assert!(matches!(err, TransportError::UnsupportedScheme(scheme) if scheme == "ftp"));
    }

    #[test]
    fn connection_failures_are_transport_errors() {
        let url = canonicalize("http://127.0.0.1:9/").expect("canonical");
        let err = fetcher(FetchConfig {
            timeout: Duration::from_millis(500),
            ..FetchConfig::default()
        })
        .fetch(&url)
        .expect_err("must fail");
        assert!(matches!(err, TransportError::Request { .. }));
    }
}
