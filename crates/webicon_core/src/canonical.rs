use std::fmt;
use std::str::FromStr;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use reqwest::Url;
use thiserror::Error;

/// Punctuation that survives escaping; everything else outside `[A-Za-z0-9]`
/// is percent-encoded before parsing.
const URL_ALLOWED_PUNCTUATION: &str = "-._~:/?#[]@!$&'()*+,;=%";

const ESCAPE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b':')
    .remove(b'/')
    .remove(b'?')
    .remove(b'#')
    .remove(b'[')
    .remove(b']')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b'%');

/// Permanent IANA URI schemes, minus `data`.
const SUPPORTED_SCHEMES: &[&str] = &[
    "aaa",
    "aaas",
    "about",
    "acap",
    "acct",
    "cap",
    "cid",
    "coap",
    "coaps",
    "crid",
    "dav",
    "dict",
    "dns",
    "example",
    "file",
    "ftp",
    "geo",
    "go",
    "gopher",
    "h323",
    "http",
    "https",
    "iax",
    "icap",
    "im",
    "imap",
    "info",
    "ipp",
    "ipps",
    "iris",
    "iris.beep",
    "iris.lwz",
    "iris.xpc",
    "iris.xpcs",
    "jabber",
    "javascript",
    "ldap",
    "mailto",
    "mid",
    "msrp",
    "msrps",
    "mtqp",
    "mupdate",
    "news",
    "nfs",
    "ni",
    "nih",
    "nntp",
    "opaquelocktoken",
    "pkcs11",
    "pop",
    "pres",
    "reload",
    "rtsp",
    "rtsps",
    "rtspu",
    "service",
    "session",
    "shttp",
    "sieve",
    "sip",
    "sips",
    "sms",
    "snmp",
    "soap.beep",
    "soap.beeps",
    "stun",
    "stuns",
    "tag",
    "tel",
    "telnet",
    "tftp",
    "thismessage",
    "tip",
    "tn3270",
    "turn",
    "turns",
    "tv",
    "urn",
    "vemmi",
    "vnc",
    "ws",
    "wss",
    "xcon",
    "xcon-userid",
    "xmlrpc.beep",
    "xmlrpc.beeps",
    "xmpp",
    "z39.50r",
    "z39.50s",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidUrl {
    #[error("empty url")]
    Empty,
    #[error("`{0}` looks like a search term, not a url")]
    SearchTerm(String),
    #[error("`{0}` carries user info")]
    UserInfo(String),
    #[error("host `{0}` contains disallowed characters")]
    DisallowedHost(String),
    #[error("`{0}` has no host")]
    MissingHost(String),
    #[error("`{input}` could not be parsed: {reason}")]
    Unparseable { input: String, reason: String },
}

/// An absolute url with query and fragment removed. Used both as the fetch
/// target and as the resolution cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalUrl(Url);

impl CanonicalUrl {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for CanonicalUrl {
    type Err = InvalidUrl;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        canonicalize(value)
    }
}

/// Validate and normalize free-form input into a [`CanonicalUrl`].
///
/// Input with a registered scheme is taken as-is. Anything else must look
/// like a bare host (contains a `.`, no whitespace) and gets `http://`
/// prepended. Inputs of the `user@host` form are rejected in both paths.
pub fn canonicalize(input: &str) -> Result<CanonicalUrl, InvalidUrl> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(InvalidUrl::Empty);
    }
    let escaped = utf8_percent_encode(trimmed, ESCAPE_SET).to_string();

    if let Ok(url) = Url::parse(&escaped)
        && has_supported_scheme(&url)
    {
        reject_user_info(trimmed, &url)?;
        return finish(url);
    }

    if !trimmed.contains('.') || trimmed.contains(char::is_whitespace) {
        return Err(InvalidUrl::SearchTerm(trimmed.to_string()));
    }

    let prefixed = format!("http://{escaped}");
    for variant in [
        trimmed.to_string(),
        escaped.clone(),
        format!("http://{trimmed}"),
        prefixed.clone(),
    ] {
        if let Ok(url) = Url::parse(&variant) {
            reject_user_info(trimmed, &url)?;
        }
    }

    let url = Url::parse(&prefixed).map_err(|err| InvalidUrl::Unparseable {
        input: trimmed.to_string(),
        reason: err.to_string(),
    })?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(InvalidUrl::MissingHost(trimmed.to_string()));
    }
    finish(url)
}

fn has_supported_scheme(url: &Url) -> bool {
    SUPPORTED_SCHEMES.contains(&url.scheme())
}

fn reject_user_info(input: &str, url: &Url) -> Result<(), InvalidUrl> {
    if !url.username().is_empty() || url.password().is_some() {
        return Err(InvalidUrl::UserInfo(input.to_string()));
    }
    Ok(())
}

fn finish(mut url: Url) -> Result<CanonicalUrl, InvalidUrl> {
    if let Some(host) = url.host_str() {
        let decoded = percent_decode_str(host)
            .decode_utf8()
            .map_err(|_| InvalidUrl::DisallowedHost(host.to_string()))?;
        if !decoded.chars().all(is_url_allowed) {
            return Err(InvalidUrl::DisallowedHost(host.to_string()));
        }
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(CanonicalUrl(url))
}

fn is_url_allowed(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || URL_ALLOWED_PUNCTUATION.contains(ch)
}
