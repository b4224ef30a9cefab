use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 11_0 like Mac OS X) AppleWebKit/604.1.38 (KHTML, like Gecko) Version/11.0 Mobile/15A372 Safari/604.1";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_BYTES: usize = 1_000_000;
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WebIconConfig {
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub fallback: FallbackSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FetchSection {
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_bytes: Option<usize>,
    pub max_redirects: Option<usize>,
    pub strict_status: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FallbackSection {
    pub service_template: Option<String>,
}

/// Fully resolved settings for the page fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_bytes: usize,
    pub max_redirects: usize,
    /// Treat non-2xx responses as transport failures instead of parsing
    /// their bodies.
    pub strict_status: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_bytes: DEFAULT_MAX_BYTES,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            strict_status: false,
        }
    }
}

impl WebIconConfig {
    /// Resolve fetch settings: env > config > defaults.
    pub fn fetch_config(&self) -> FetchConfig {
        self.fetch_config_with_lookup(|key| env::var(key).ok())
    }

    /// Resolve the fallback service template: env WEBICON_SERVICE_TEMPLATE > config > None.
    pub fn service_template(&self) -> Option<String> {
        self.service_template_with_lookup(|key| env::var(key).ok())
    }

    fn fetch_config_with_lookup<F>(&self, lookup_env: F) -> FetchConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let user_agent = non_empty(lookup_env("WEBICON_USER_AGENT"))
            .or_else(|| self.fetch.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let timeout_ms = parsed(&lookup_env, "WEBICON_HTTP_TIMEOUT_MS")
            .or(self.fetch.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        let max_bytes = parsed(&lookup_env, "WEBICON_MAX_BYTES")
            .or(self.fetch.max_bytes)
            .unwrap_or(DEFAULT_MAX_BYTES);
        let max_redirects = parsed(&lookup_env, "WEBICON_MAX_REDIRECTS")
            .or(self.fetch.max_redirects)
            .unwrap_or(DEFAULT_MAX_REDIRECTS);
        let strict_status = parsed(&lookup_env, "WEBICON_STRICT_STATUS")
            .or(self.fetch.strict_status)
            .unwrap_or(false);

        FetchConfig {
            user_agent,
            timeout: Duration::from_millis(timeout_ms),
            max_bytes,
            max_redirects,
            strict_status,
        }
    }

    fn service_template_with_lookup<F>(&self, lookup_env: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        non_empty(lookup_env("WEBICON_SERVICE_TEMPLATE"))
            .or_else(|| non_empty(self.fallback.service_template.clone()))
    }
}

/// Load and parse a WebIconConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WebIconConfig> {
    if !config_path.exists() {
        return Ok(WebIconConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WebIconConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> String {
    format!(
        "# webicon configuration\n# Environment variables (WEBICON_*) take precedence over values here.\n\n[fetch]\n# user_agent = \"{DEFAULT_USER_AGENT}\"\ntimeout_ms = {DEFAULT_TIMEOUT_MS}\nmax_bytes = {DEFAULT_MAX_BYTES}\nmax_redirects = {DEFAULT_MAX_REDIRECTS}\n# Parse 4xx/5xx bodies too; set to true to treat them as failures.\nstrict_status = false\n\n[fallback]\n# service_template = \"https://icons.example.org/favicon?url={{origin}}\"\n",
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed<T, F>(lookup_env: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup_env(key).and_then(|value| value.trim().parse::<T>().ok())
}
