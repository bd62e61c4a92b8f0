#![forbid(unsafe_code)]

//! Link canonicalization for proxied HTML.
//!
//! Every link found in a fetched page is turned into a root-relative path on
//! the proxy so that following it routes back through [`crate::decode`]:
//!
//! * `https://host/p` becomes `/https.host/p` (likewise for `http`),
//! * `/p` becomes `/<domain>/p` when the page's domain is known,
//! * `//host/p` is treated like `/host/p`,
//! * `item?id=1` becomes `/<protocol>.<domain>/item?id=1`.
//!
//! Substitution happens in place on the raw markup. Only whole `href`/`src`
//! attribute values are replaced, so comments, whitespace and quoting style of
//! the page survive untouched.

use std::{
    borrow::Cow,
    collections::BTreeMap,
    sync::LazyLock,
};

use regex::{Captures, Regex};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::decode::{Protocol, ProxiedPath, RewriteContext};

// Start tags only, so attribute-looking text in prose or comments is skipped.
static START_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<[A-Za-z][^\s/>]*(?:[^>"']|"[^"]*"|'[^']*')*>"#)
        .expect("start tag pattern is valid")
});

// `lead` stops `data-href` or `xsrc` from matching; `srcset` fails on the `=`.
static LINK_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?P<lead>[\s"'/])(?P<attr>(?i:href|src))(?P<eq>\s*=\s*)(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<uq>[^\s"'=<>`][^\s"'<>`]*))"#,
    )
    .expect("link attribute pattern is valid")
});

static BARE_ABSOLUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"=(?P<quote>["'])(?P<scheme>https?)://"#)
        .expect("absolute url pattern is valid")
});

static UNQUOTED_ABSOLUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<prefix>\s[A-Za-z][-A-Za-z0-9_:.]*\s*=\s*)(?P<scheme>https?)://"#)
        .expect("unquoted absolute url pattern is valid")
});

const CANDIDATE_SELECTOR: &str = "a[href], [src]";

/// How a single `href`/`src` value relates to the page it was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrefKind {
    /// `//host/path`
    ProtocolRelative,
    /// `/path`
    SiteRoot,
    /// `http://...` or `https://...`
    Absolute(Protocol),
    /// `item?id=1`, `page.html`
    PageRelative,
    /// Fragments and foreign schemes such as `mailto:` or `javascript:`.
    Untouched,
}

pub fn classify_href(href: &str) -> HrefKind {
    if href.starts_with("//") {
        HrefKind::ProtocolRelative
    } else if href.starts_with('/') {
        HrefKind::SiteRoot
    } else if href.starts_with(Protocol::Https.url_prefix()) {
        HrefKind::Absolute(Protocol::Https)
    } else if href.starts_with(Protocol::Http.url_prefix()) {
        HrefKind::Absolute(Protocol::Http)
    } else if href.starts_with('#') || has_foreign_scheme(href) {
        HrefKind::Untouched
    } else {
        HrefKind::PageRelative
    }
}

fn has_foreign_scheme(href: &str) -> bool {
    let head = href
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let Some((scheme, _)) = head.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Computes the proxied replacement for a single link.
///
/// Returns `None` when the value must be left alone, either because it is not
/// a web link or because the context lacks the domain needed to anchor it.
pub fn rewrite_href(href: &str, context: &RewriteContext) -> Option<String> {
    let rewritten = match classify_href(href) {
        HrefKind::ProtocolRelative => {
            let rooted = format!("/{}", href.trim_start_matches('/'));
            return rewrite_href(&rooted, context);
        }
        HrefKind::SiteRoot if ProxiedPath::is_encoded(href) => href.to_string(),
        HrefKind::SiteRoot => match &context.domain {
            Some(domain) => format!("/{domain}{href}"),
            None => href.to_string(),
        },
        HrefKind::Absolute(protocol) => {
            // `https://host` gains a `/` after the host so the result reads
            // as encoded on a second pass.
            let rest = &href[protocol.url_prefix().len()..];
            let (host, tail) = rest.split_at(rest.find(['/', '?', '#']).unwrap_or(rest.len()));
            let slash = if tail.starts_with('/') { "" } else { "/" };
            format!("{}{host}{slash}{tail}", protocol.path_marker())
        }
        HrefKind::PageRelative => {
            let Some(domain) = context.domain.as_deref().filter(|d| !d.is_empty()) else {
                warn!(href, "no domain known for page-relative link; leaving it as is");
                return None;
            };
            let protocol = context.protocol.unwrap_or(Protocol::Http);
            format!("{}{domain}/{href}", protocol.path_marker())
        }
        HrefKind::Untouched => return None,
    };

    Some(format!("/{}", rewritten.trim_start_matches('/')))
}

/// Rewrites every anchor `href` and every `src` in `html` to a proxied path.
pub fn rewrite_links(html: &str, context: &RewriteContext) -> String {
    let mut replacements = BTreeMap::new();
    for original in collect_candidates(html) {
        if let Some(replacement) = rewrite_href(&original, context) {
            debug!(
                domain = context.domain.as_deref().unwrap_or("-"),
                %original,
                %replacement,
                "rewriting link"
            );
            replacements.insert(original, replacement);
        }
    }

    let substituted = START_TAG.replace_all(html, |caps: &Captures| {
        let tag = &caps[0];
        let tag = if replacements.is_empty() {
            Cow::Borrowed(tag)
        } else {
            substitute_attributes(tag, &replacements)
        };
        UNQUOTED_ABSOLUTE
            .replace_all(&tag, "${prefix}/${scheme}.")
            .into_owned()
    });

    BARE_ABSOLUTE
        .replace_all(&substituted, "=${quote}/${scheme}.")
        .into_owned()
}

/// Distinct, sorted link values found by the HTML parser.
fn collect_candidates(html: &str) -> Vec<String> {
    let selector = match Selector::parse(CANDIDATE_SELECTOR) {
        Ok(selector) => selector,
        Err(err) => {
            warn!("could not build link selector: {err}");
            return Vec::new();
        }
    };
    let document = Html::parse_document(html);

    let mut values = Vec::new();
    for element in document.select(&selector) {
        let element = element.value();
        if element.name() == "a"
            && let Some(href) = element.attr("href")
        {
            values.push(href.to_string());
        }
        if let Some(src) = element.attr("src") {
            values.push(src.to_string());
        }
    }
    values.retain(|value| !value.is_empty());
    values.sort();
    values.dedup();
    values
}

/// Replaces `href`/`src` values inside one start tag. Quoting style is kept;
/// unquoted values stay unquoted unless the replacement needs quotes.
fn substitute_attributes<'a>(
    tag: &'a str,
    replacements: &BTreeMap<String, String>,
) -> Cow<'a, str> {
    LINK_ATTRIBUTE.replace_all(tag, |caps: &Captures| {
        let (quote, raw) = match (caps.name("dq"), caps.name("sq"), caps.name("uq")) {
            (Some(value), _, _) => (Some('"'), value.as_str()),
            (None, Some(value), _) => (Some('\''), value.as_str()),
            (None, None, Some(value)) => (None, value.as_str()),
            (None, None, None) => return caps[0].to_string(),
        };
        let decoded = unescape_attribute(raw);
        let Some(replacement) = replacements.get(&*decoded) else {
            return caps[0].to_string();
        };
        let value = if decoded == raw {
            Cow::Borrowed(replacement.as_str())
        } else {
            escape_attribute(replacement)
        };
        let quote = match quote {
            Some(quote) => quote.to_string(),
            None if value.contains(|c: char| c.is_whitespace() || "\"'<>=`".contains(c)) => {
                "\"".to_string()
            }
            None => String::new(),
        };
        format!(
            "{}{}{}{quote}{value}{quote}",
            &caps["lead"], &caps["attr"], &caps["eq"]
        )
    })
}

fn unescape_attribute(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    Cow::Owned(
        raw.replace("&quot;", "\"")
            .replace("&#34;", "\"")
            .replace("&#39;", "'")
            .replace("&#x27;", "'")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&"),
    )
}

fn escape_attribute(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '"', '\'', '<', '>']) {
        return Cow::Borrowed(value);
    }
    Cow::Owned(
        value
            .replace('&', "&amp;")
            .replace('"', "&quot;")
            .replace('\'', "&#39;")
            .replace('<', "&lt;")
            .replace('>', "&gt;"),
    )
}
