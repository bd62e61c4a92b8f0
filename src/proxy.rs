#![forbid(unsafe_code)]

use std::sync::Arc;

use tracing::info;

use crate::{
    decode::{DecodedPath, ProxiedPath, decode_path},
    error::FetchError,
    fetch::{FetchRequest, Fetcher},
    rewrite::rewrite_links,
};

pub const PROXY_USER_AGENT: &str = concat!("newtube-proxy/", env!("CARGO_PKG_VERSION"));

/// Request-independent state for proxying pages: the outbound fetcher plus
/// the identifying headers sent upstream.
#[derive(Clone)]
pub struct Proxy {
    fetcher: Arc<dyn Fetcher>,
    from: Option<String>,
}

impl Proxy {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            from: None,
        }
    }

    /// Adds a `From` header so upstream operators can reach whoever runs the proxy.
    pub fn with_contact(mut self, from: Option<String>) -> Self {
        self.from = from.filter(|value| !value.trim().is_empty());
        self
    }

    fn request_for(&self, url: &str) -> FetchRequest {
        let mut headers = vec![("User-Agent".to_string(), PROXY_USER_AGENT.to_string())];
        if let Some(from) = &self.from {
            headers.push(("From".to_string(), from.clone()));
        }
        FetchRequest {
            url: url.to_string(),
            headers,
            skip_tls_verify: true,
        }
    }

    /// Decodes a router path, fetches the page behind it and rewrites its
    /// links so they route back through the proxy.
    pub fn decode_and_fetch(&self, path: &str) -> Result<String, FetchError> {
        if ProxiedPath::classify(path) == ProxiedPath::Home {
            return Err(FetchError::EmptyPath);
        }
        let DecodedPath { fetch_url, context } = decode_path(path);

        info!(url = %fetch_url, "get");
        let response = self.fetcher.fetch(&self.request_for(&fetch_url))?;

        info!(
            domain = context.domain.as_deref().unwrap_or("-"),
            status = response.status,
            "replacing urls"
        );
        Ok(rewrite_links(&response.body, &context))
    }
}
