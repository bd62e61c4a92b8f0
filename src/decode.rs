#![forbid(unsafe_code)]

//! Decoding of the self-referential paths the proxy hands out.
//!
//! A link rewritten by [`crate::rewrite`] comes back to the router as a path
//! such as `https.example.com/page?x=1`. This module turns that path into the
//! real upstream URL plus the context the fetched page must be rewritten
//! under.

use std::fmt;

use url::Url;

/// Upstream scheme encoded into a proxied path as `http.` or `https.`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// Marker used inside proxied paths, e.g. `https.`.
    pub fn path_marker(self) -> &'static str {
        match self {
            Self::Http => "http.",
            Self::Https => "https.",
        }
    }

    /// Scheme prefix of a real URL, e.g. `https://`.
    pub fn url_prefix(self) -> &'static str {
        match self {
            Self::Http => "http://",
            Self::Https => "https://",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host and scheme a document was fetched under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteContext {
    pub domain: Option<String>,
    pub protocol: Option<Protocol>,
}

impl RewriteContext {
    pub fn new(domain: Option<String>, protocol: Option<Protocol>) -> Self {
        Self { domain, protocol }
    }

    pub fn with_origin(domain: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            domain: Some(domain.into()),
            protocol: Some(protocol),
        }
    }
}

/// The three shapes a router path can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxiedPath<'a> {
    Home,
    /// `http.<host>/<rest>` or `https.<host>/<rest>`; `rest` excludes the marker.
    Absolute { protocol: Protocol, rest: &'a str },
    Relative(&'a str),
}

impl<'a> ProxiedPath<'a> {
    pub fn classify(path: &'a str) -> Self {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Self::Home;
        }
        for protocol in [Protocol::Http, Protocol::Https] {
            if let Some(rest) = path.strip_prefix(protocol.path_marker()) {
                return Self::Absolute { protocol, rest };
            }
        }
        Self::Relative(path)
    }

    /// True for values that already point at another host through the proxy,
    /// i.e. a marker followed by a host and a `/`. `/https.html` is a plain
    /// page on the current site, not an encoded link.
    pub fn is_encoded(value: &str) -> bool {
        match ProxiedPath::classify(value) {
            ProxiedPath::Absolute { rest, .. } => rest
                .split_once('/')
                .is_some_and(|(host, _)| looks_like_host(host)),
            _ => false,
        }
    }
}

/// Result of decoding a router path: what to fetch and how to rewrite it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPath {
    pub fetch_url: String,
    pub context: RewriteContext,
}

/// Decodes a router path into an upstream URL and rewrite context.
///
/// Never fails: anything that cannot be understood is fetched literally with
/// `http://` prepended and no context.
pub fn decode_path(path: &str) -> DecodedPath {
    let mut context = RewriteContext::default();
    let mut url = match ProxiedPath::classify(path) {
        ProxiedPath::Home => String::new(),
        ProxiedPath::Absolute { protocol, rest } => {
            let url = format!("{}{rest}", protocol.url_prefix());
            context.domain = network_location(&url);
            context.protocol = Some(protocol);
            url
        }
        ProxiedPath::Relative(rest) => {
            if rest.starts_with("www") {
                context.domain = Some(bare_host_domain(rest));
            }
            rest.to_string()
        }
    };

    if !url.starts_with('/') && !url.starts_with("http") {
        url.insert_str(0, "http://");
    }

    DecodedPath {
        fetch_url: url,
        context,
    }
}

/// The authority exactly as written between `//` and the path, port and
/// userinfo included. `None` when the URL does not parse.
fn network_location(url: &str) -> Option<String> {
    Url::parse(url).ok()?;
    let (_, after_scheme) = url.split_once("://")?;
    let end = after_scheme
        .find(['/', '?', '#'])
        .unwrap_or(after_scheme.len());
    let authority = &after_scheme[..end];
    (!authority.is_empty()).then(|| authority.to_string())
}

fn looks_like_host(candidate: &str) -> bool {
    let host = candidate.rsplit_once('@').map_or(candidate, |(_, host)| host);
    let is_port = |port: &str| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit());

    if let Some(bracketed) = host.strip_prefix('[') {
        return match bracketed.split_once(']') {
            Some((literal, "")) => !literal.is_empty(),
            Some((literal, after)) => {
                !literal.is_empty() && after.strip_prefix(':').is_some_and(is_port)
            }
            None => false,
        };
    }

    let (name, port) = match host.rsplit_once(':') {
        Some((name, port)) if is_port(port) => (name, Some(port)),
        Some(_) => return false,
        None => (host, None),
    };
    let labels_ok = !name.is_empty()
        && name
            .split('.')
            .all(|label| !label.is_empty() && label.chars().all(|c| c.is_alphanumeric() || c == '-'));
    labels_ok && (name.contains('.') || port.is_some() || name.eq_ignore_ascii_case("localhost"))
}

// `www.example.com/page` keeps everything before the first slash, while a
// slash-free `www.example.com` drops its first label.
fn bare_host_domain(path: &str) -> String {
    match path.split_once('/') {
        Some((host, _)) => host.to_string(),
        None => path.split('.').skip(1).collect::<Vec<_>>().join("."),
    }
}
