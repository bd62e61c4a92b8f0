#![forbid(unsafe_code)]

//! On-disk cache for successful upstream GET responses.
//!
//! Entries are JSON files named after the blake3 hash of the URL. Nothing is
//! ever evicted; clearing the directory is the only way to drop entries.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::FetchError,
    fetch::{FetchRequest, FetchResponse, Fetcher},
    store::write_json_atomic,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub response: FetchResponse,
}

pub struct ResponseCache {
    root: PathBuf,
}

impl ResponseCache {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).with_context(|| format!("creating {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        let digest = blake3::hash(url.as_bytes());
        self.root.join(format!("{}.json", digest.to_hex()))
    }

    /// Returns the stored response for `url`, ignoring unreadable entries.
    pub fn get(&self, url: &str) -> Option<CachedResponse> {
        let raw = fs::read(self.entry_path(url)).ok()?;
        let entry: CachedResponse = serde_json::from_slice(&raw).ok()?;
        // Guards against hash collisions and hand-edited files.
        (entry.url == url).then_some(entry)
    }

    pub fn put(&self, url: &str, response: &FetchResponse) -> Result<()> {
        let entry = CachedResponse {
            url: url.to_string(),
            fetched_at: Utc::now(),
            response: response.clone(),
        };
        write_json_atomic(&self.entry_path(url), &entry)
    }
}

/// Serves repeat requests from a [`ResponseCache`] and records fresh 200s.
pub struct CachingFetcher<F> {
    inner: F,
    cache: ResponseCache,
}

impl<F: Fetcher> CachingFetcher<F> {
    pub fn new(inner: F, cache: ResponseCache) -> Self {
        Self { inner, cache }
    }
}

impl<F: Fetcher> Fetcher for CachingFetcher<F> {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        if let Some(entry) = self.cache.get(&request.url) {
            debug!(url = %request.url, fetched_at = %entry.fetched_at, "response cache hit");
            return Ok(entry.response);
        }

        let response = self.inner.fetch(request)?;
        if response.status == 200
            && let Err(err) = self.cache.put(&request.url, &response)
        {
            warn!(url = %request.url, "could not store cached response: {err:#}");
        }
        Ok(response)
    }
}
