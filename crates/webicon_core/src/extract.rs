use std::borrow::Cow;

use encoding_rs::WINDOWS_1252;
use reqwest::Url;
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::debug;

const HEAD_LINK_SELECTOR: &str = "head link[rel]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaviconType {
    AppleTouchIcon,
    AppleTouchIconPrecomposed,
    Icon,
    LegacyIco,
    Undefined,
}

impl FaviconType {
    pub fn from_rel(rel: &str) -> Self {
        match rel.trim().to_lowercase().as_str() {
            "apple-touch-icon" => Self::AppleTouchIcon,
            "apple-touch-icon-precomposed" => Self::AppleTouchIconPrecomposed,
            "icon" | "shortcut icon" => Self::Icon,
            _ => Self::Undefined,
        }
    }

    pub fn is_apple_touch(self) -> bool {
        matches!(self, Self::AppleTouchIcon | Self::AppleTouchIconPrecomposed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AppleTouchIcon => "apple-touch-icon",
            Self::AppleTouchIconPrecomposed => "apple-touch-icon-precomposed",
            Self::Icon => "icon",
            Self::LegacyIco => "legacy-ico",
            Self::Undefined => "undefined",
        }
    }
}

/// Declared `sizes` of a link; `(0, 0)` when absent or unparseable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IconSize {
    pub width: u32,
    pub height: u32,
}

impl IconSize {
    pub const ZERO: Self = Self {
        width: 0,
        height: 0,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn parse(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self::ZERO;
        };
        let parts = value.split('x').collect::<Vec<_>>();
        if parts.len() < 2 {
            return Self::ZERO;
        }
        match (
            parts[0].trim().parse::<u32>(),
            parts[1].trim().parse::<u32>(),
        ) {
            (Ok(width), Ok(height)) => Self { width, height },
            _ => Self::ZERO,
        }
    }

    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaviconCandidate {
    pub url: Url,
    pub size: IconSize,
    pub kind: FaviconType,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkupError {
    #[error("document is empty")]
    Empty,
    #[error("invalid link selector: {0}")]
    Selector(String),
}

/// Extract icon links from the document head. Never fails: every error path
/// degrades to fewer (or zero) candidates.
pub fn extract_favicons(html: &[u8], base_url: &Url) -> Vec<FaviconCandidate> {
    match try_extract_favicons(html, base_url) {
        Ok(candidates) => candidates,
        Err(err) => {
            debug!(base_url = %base_url, error = %err, "no favicon candidates in markup");
            Vec::new()
        }
    }
}

pub fn try_extract_favicons(
    html: &[u8],
    base_url: &Url,
) -> Result<Vec<FaviconCandidate>, MarkupError> {
    let text = decode_markup(html)?;
    let document = Html::parse_document(&text);
    let selector = Selector::parse(HEAD_LINK_SELECTOR)
        .map_err(|err| MarkupError::Selector(err.to_string()))?;

    let mut candidates = Vec::new();
    for element in document.select(&selector) {
        let link = element.value();
        let rel = link.attr("rel").unwrap_or_default();
        if !rel.to_lowercase().contains("icon") {
            continue;
        }
        if let Some(candidate) =
            candidate_from_link(rel, link.attr("href"), link.attr("sizes"), base_url)
        {
            candidates.push(candidate);
        }
    }
    Ok(candidates)
}

fn decode_markup(html: &[u8]) -> Result<Cow<'_, str>, MarkupError> {
    if html.is_empty() {
        return Err(MarkupError::Empty);
    }
    let text = match std::str::from_utf8(html) {
        Ok(text) => Cow::Borrowed(text),
        // Bodies cut at the byte cap may end inside a character.
        Err(err) if err.error_len().is_none() => {
            String::from_utf8_lossy(&html[..err.valid_up_to()])
        }
        Err(_) => WINDOWS_1252.decode_without_bom_handling(html).0,
    };
    if text.trim().is_empty() {
        return Err(MarkupError::Empty);
    }
    Ok(text)
}

fn candidate_from_link(
    rel: &str,
    href: Option<&str>,
    sizes: Option<&str>,
    base_url: &Url,
) -> Option<FaviconCandidate> {
    let href = href.map(str::trim).filter(|value| !value.is_empty())?;
    let kind = if href.contains(".ico") {
        FaviconType::LegacyIco
    } else {
        FaviconType::from_rel(rel)
    };
    let url = resolve_href(href, base_url)?;
    Some(FaviconCandidate {
        url,
        size: IconSize::parse(sizes),
        kind,
    })
}

fn resolve_href(href: &str, base_url: &Url) -> Option<Url> {
    let joined = if href.starts_with("//") {
        base_url.join(&format!("https:{href}"))
    } else {
        base_url.join(href)
    };
    joined.ok()
}

#[cfg(test)]
mod tests {
    use reqwest::Url;

    use super::{
        FaviconType, IconSize, MarkupError, extract_favicons, try_extract_favicons,
    };

    fn base() -> Url {
        Url::parse("http://site.test/blog/post.html").expect("base url")
    }

    #[test]
    fn extracts_head_links_with_icon_rel() {
        let html = br#"<!doctype html>
<html><head>
  <title>Site</title>
  <link rel="stylesheet" href="/style.css">
  <link rel="icon" sizes="32x32" href="/favicon-32.png">
  <link rel="Shortcut Icon" href="img/logo.png">
  <link rel="apple-touch-icon" sizes="180x180" href="//cdn.test/touch.png">
  <link rel="mask-icon" href="/mask.svg">
</head><body><p>hello</p></body></html>"#;
        let candidates = extract_favicons(html, &base());

        assert_eq!(candidates.len(), 4);
        assert_eq!(candidates[0].url.as_str(), "http://site.test/favicon-32.png");
        assert_eq!(candidates[0].size, IconSize::new(32, 32));
        assert_eq!(candidates[0].kind, FaviconType::Icon);

        assert_eq!(candidates[1].url.as_str(), "http://site.test/blog/img/logo.png");
        assert_eq!(candidates[1].kind, FaviconType::Icon);
        assert_eq!(candidates[1].size, IconSize::ZERO);

        assert_eq!(candidates[2].url.as_str(), "https://cdn.test/touch.png");
        assert_eq!(candidates[2].kind, FaviconType::AppleTouchIcon);

        assert_eq!(candidates[3].kind, FaviconType::Undefined);
    }

    #[test]
    fn ico_href_overrides_rel() {
        let html = br#"<head><link rel="apple-touch-icon" sizes="57x57" href="/touch.ico"></head>"#;
        let candidates = extract_favicons(html, &base());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].kind, FaviconType::LegacyIco);
    }

    #[test]
    fn blank_hrefs_are_skipped() {
        let html = br#"<head>
<link rel="icon" href="   ">
<link rel="icon">
<link rel="icon" href="/ok.png">
</head>"#;
        let candidates = extract_favicons(html, &base());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url.as_str(), "http://site.test/ok.png");
    }

    #[test]
    fn unresolvable_hrefs_are_dropped() {
        let html = br#"<head>
<link rel="icon" href="http://[broken/a.png">
<link rel="icon" href="/fine.png">
</head>"#;
        let candidates = extract_favicons(html, &base());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url.as_str(), "http://site.test/fine.png");
    }

    #[test]
    fn links_outside_head_are_ignored() {
        let html = br#"<html><head><title>t</title></head>
<body><p>text</p><link rel="icon" href="/body.png"></body></html>"#;
        assert!(extract_favicons(html, &base()).is_empty());
    }

    #[test]
    fn malformed_markup_is_parsed_best_effort() {
        let html = b"<html><head><link rel=icon href=/a.png sizes=16x16><link rel=icon";
        let candidates = extract_favicons(html, &base());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].size, IconSize::new(16, 16));
    }

    #[test]
    fn latin1_bytes_fall_back_to_single_byte_decoding() {
        let mut html = b"<head><title>caf".to_vec();
        html.push(0xE9);
        html.extend_from_slice(b"</title><link rel=\"icon\" href=\"/caf\xE9.png\"></head>");
        let candidates = extract_favicons(&html, &base());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url.as_str(), "http://site.test/caf%C3%A9.png");
    }

    #[test]
    fn utf8_cut_inside_a_character_keeps_utf8_decoding() {
        let page = "<head><title>Café</title><link rel=\"icon\" href=\"/café.png\"></head><p>é";
        let bytes = page.as_bytes();
        let truncated = &bytes[..bytes.len() - 1];
        assert!(std::str::from_utf8(truncated).is_err());

        let candidates = extract_favicons(truncated, &base());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url.as_str(), "http://site.test/caf%C3%A9.png");
    }

    #[test]
    fn empty_input_reports_empty_document() {
        assert_eq!(try_extract_favicons(b"", &base()), Err(MarkupError::Empty));
        assert_eq!(try_extract_favicons(b"  \n ", &base()), Err(MarkupError::Empty));
        assert!(extract_favicons(b"", &base()).is_empty());
    }

    #[test]
    fn size_parsing_defaults_to_zero() {
        assert_eq!(IconSize::parse(Some("48x32")), IconSize::new(48, 32));
        assert_eq!(IconSize::parse(Some("any")), IconSize::ZERO);
        assert_eq!(IconSize::parse(Some("16xbig")), IconSize::ZERO);
        assert_eq!(IconSize::parse(Some("")), IconSize::ZERO);
        assert_eq!(IconSize::parse(None), IconSize::ZERO);
        assert_eq!(IconSize::new(180, 180).area(), 32_400);
    }

    #[test]
    fn rel_classification() {
        assert_eq!(FaviconType::from_rel("apple-touch-icon"), FaviconType::AppleTouchIcon);
        assert_eq!(
            FaviconType::from_rel("apple-touch-icon-precomposed"),
            FaviconType::AppleTouchIconPrecomposed
        );
        assert_eq!(FaviconType::from_rel("ICON"), FaviconType::Icon);
        assert_eq!(FaviconType::from_rel("shortcut icon"), FaviconType::Icon);
        assert_eq!(FaviconType::from_rel("fluid-icon"), FaviconType::Undefined);
        assert!(FaviconType::AppleTouchIconPrecomposed.is_apple_touch());
        assert!(!FaviconType::LegacyIco.is_apple_touch());
    }
}
