#![forbid(unsafe_code)]

use thiserror::Error;

/// Failure while retrieving an upstream page.
///
/// HTTP error statuses are not represented here: an upstream 404 still carries
/// a body that gets rewritten and handed back to the browser.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("nothing to fetch for an empty path")]
    EmptyPath,
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("reading response body from {url}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("building TLS configuration: {0}")]
    Tls(String),
}

impl FetchError {
    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }
}
