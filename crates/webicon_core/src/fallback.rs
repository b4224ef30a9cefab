//! Fallbacks for pages without a usable icon: a third-party icon service url
//! and a deterministic placeholder colour.

use std::fmt;

use reqwest::Url;

pub const ORIGIN_PLACEHOLDER: &str = "{origin}";
pub const DEFAULT_SERVICE_TEMPLATE: &str = "https://t3.gstatic.com/faviconV2?client=SOCIAL&type=FAVICON&size=128&fallback_opts=TYPE,SIZE,URL&url={origin}";

const DEFAULT_BACKGROUND_COLORS: [u32; 42] = [
    0x2e761a, 0x399320, 0x40a624, 0x57bd35, 0x70cf5b, 0x90e07f, 0xb1eea5, 0x881606, 0xaa1b08,
    0xc21f09, 0xd92215, 0xee4b36, 0xf67964, 0xffa792, 0x025295, 0x0568ba, 0x0675d3, 0x0996f8,
    0x2ea3ff, 0x61b4ff, 0x95cdff, 0x00736f, 0x01908b, 0x01a39d, 0x01bdad, 0x27d9d2, 0x58e7e6,
    0x89f4f5, 0xc84510, 0xe35b0f, 0xf77100, 0xff9216, 0xffad2e, 0xffc446, 0xffdf81, 0x911a2e,
    0xb7223b, 0xcf2743, 0xea385e, 0xfa526e, 0xff7a8d, 0xffa7b3,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub fn from_rgb(rgb: u32) -> Self {
        Self {
            r: ((rgb >> 16) & 0xff) as u8,
            g: ((rgb >> 8) & 0xff) as u8,
            b: (rgb & 0xff) as u8,
        }
    }

    pub fn to_rgb(self) -> u32 {
        (u32::from(self.r) << 16) | (u32::from(self.g) << 8) | u32::from(self.b)
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// `scheme://host` of a page url, or an empty string when it has no host.
pub fn page_origin(page_url: &str) -> String {
    Url::parse(page_url.trim())
        .ok()
        .and_then(|url| {
            url.host_str()
                .map(|host| format!("{}://{}", url.scheme(), host))
        })
        .unwrap_or_default()
}

pub fn service_icon_url(page_url: &str) -> String {
    service_icon_url_with(DEFAULT_SERVICE_TEMPLATE, page_url)
}

/// Fill `{origin}` in `template`; templates without the placeholder get the
/// origin appended.
pub fn service_icon_url_with(template: &str, page_url: &str) -> String {
    let origin = page_origin(page_url);
    if template.contains(ORIGIN_PLACEHOLDER) {
        template.replace(ORIGIN_PLACEHOLDER, &origin)
    } else {
        format!("{template}{origin}")
    }
}

/// The url a presentation layer should load: the resolved icon, unless there
/// is none or it is a legacy `.ico`, in which case the service url.
pub fn display_icon_url(page_url: &str, icons: &[String]) -> String {
    display_icon_url_with(DEFAULT_SERVICE_TEMPLATE, page_url, icons)
}

pub fn display_icon_url_with(template: &str, page_url: &str, icons: &[String]) -> String {
    match icons.first() {
        Some(icon) if !icon.ends_with(".ico") => icon.clone(),
        _ => service_icon_url_with(template, page_url),
    }
}

/// DJB2 over the unicode scalar values of `text`, with 32-bit wraparound.
pub fn stable_hash(text: &str) -> i32 {
    text.chars().fold(5381_i32, |hash, ch| {
        hash.wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(ch as i32)
    })
}

pub fn stable_color(text: &str) -> Color {
    let index = stable_hash(text).unsigned_abs() as usize % DEFAULT_BACKGROUND_COLORS.len();
    Color::from_rgb(DEFAULT_BACKGROUND_COLORS[index])
}

#[cfg(test)]
mod tests {
    use reqwest::Url;

    use super::{
        Color, display_icon_url, page_origin, service_icon_url, service_icon_url_with,
        stable_color, stable_hash,
    };

    #[test]
    fn service_url_embeds_origin_only() {
        assert_eq!(
            service_icon_url("https://news.example.com/story/1?ref=x#c"),
            "https://t3.gstatic.com/faviconV2?client=SOCIAL&type=FAVICON&size=128&fallback_opts=TYPE,SIZE,URL&url=https://news.example.com"
        );
    }

    #[test]
    fn service_url_is_valid_without_host() {
        for input in ["", "not a url", "mailto:someone@example.com"] {
            assert_eq!(page_origin(input), "");
            let url = service_icon_url(input);
            assert!(url.ends_with("&url="));
            Url::parse(&url).expect("service url parses");
        }
    }

    #[test]
    fn custom_templates_with_and_without_placeholder() {
        assert_eq!(
            service_icon_url_with("https://icons.test/{origin}/icon", "http://a.test/x"),
            "https://icons.test/http://a.test/icon"
        );
        assert_eq!(
            service_icon_url_with("https://icons.test/?u=", "http://a.test/x"),
            "https://icons.test/?u=http://a.test"
        );
    }

    #[test]
    fn display_url_prefers_resolved_non_ico_icons() {
        let page = "https://site.test/";
        assert_eq!(
            display_icon_url(page, &["https://cdn.test/a.png".to_string()]),
            "https://cdn.test/a.png"
        );
        assert_eq!(
            display_icon_url(page, &["https://site.test/favicon.ico".to_string()]),
            service_icon_url(page)
        );
        assert_eq!(display_icon_url(page, &[]), service_icon_url(page));
    }

    #[test]
    fn stable_hash_matches_djb2() {
        assert_eq!(stable_hash(""), 5381);
        assert_eq!(stable_hash("a"), 5381 * 33 + 97);
        assert_eq!(stable_hash("ab"), (5381 * 33 + 97) * 33 + 98);
    }

    #[test]
    fn stable_color_is_deterministic_and_total() {
        assert_eq!(stable_color(""), Color::from_rgb(0x90e07f));
        assert_eq!(stable_color("a"), Color::from_rgb(0xd92215));
        for text in [
            "example.com",
            "https://example.com/",
            "日本語のテキスト",
            "🦀🦀🦀",
            "long text ".repeat(1000).as_str(),
        ] {
            assert_eq!(stable_color(text), stable_color(text));
        }
    }

    #[test]
    fn color_hex_round_trip() {
        let color = Color::from_rgb(0x0568ba);
        assert_eq!(color, Color { r: 0x05, g: 0x68, b: 0xba });
        assert_eq!(color.to_hex(), "#0568ba");
        assert_eq!(color.to_rgb(), 0x0568ba);
        assert_eq!(color.to_string(), "#0568ba");
    }
}
