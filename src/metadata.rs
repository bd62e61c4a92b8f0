#![forbid(unsafe_code)]

//! Video metadata persistence. One pretty-printed JSON file per video id
//! under `<media_root>/metadata/`.
//!
//! Records are written by the video cache after a successful download and read
//! back by the JSON API.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{is_safe_segment, read_json, write_json_atomic};

pub const METADATA_SUBDIR: &str = "metadata";
pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const MAX_PAGE_SIZE: usize = 200;

/// Everything we remember about a cached video.
///
/// Most fields mirror what `yt-dlp` reports and are optional so partially
/// known metadata still round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub videoid: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// The watch URL the video was requested under.
    pub source_url: String,
    /// Downloaded media file, absent until a download succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_path: Option<String>,
    pub cached_at: DateTime<Utc>,
}

/// One page of a larger listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl<T> Page<T> {
    /// Slices `items` into the 1-based `page`, clamping nonsense input.
    pub fn of(items: Vec<T>, page: usize, per_page: usize) -> Self {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
        let total = items.len();
        let items = items
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();
        Self {
            items,
            page,
            per_page,
            total,
        }
    }
}

pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    pub fn open(media_root: &Path) -> Result<Self> {
        let root = media_root.join(METADATA_SUBDIR);
        fs::create_dir_all(&root).with_context(|| format!("creating {}", root.display()))?;
        Ok(Self { root })
    }

    fn record_path(&self, videoid: &str) -> Result<PathBuf> {
        if !is_safe_segment(videoid) {
            bail!("invalid video id: {videoid:?}");
        }
        Ok(self.root.join(format!("{videoid}.json")))
    }

    pub fn get(&self, videoid: &str) -> Result<Option<VideoRecord>> {
        read_json(&self.record_path(videoid)?)
    }

    pub fn put(&self, record: &VideoRecord) -> Result<()> {
        write_json_atomic(&self.record_path(&record.videoid)?, record)
    }

    /// All records, most recently cached first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<VideoRecord>> {
        let mut records = Vec::new();
        let entries =
            fs::read_dir(&self.root).with_context(|| format!("listing {}", self.root.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_json::<VideoRecord>(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => warn!("skipping metadata file: {err:#}"),
            }
        }
        records.sort_by(|a, b| {
            b.cached_at
                .cmp(&a.cached_at)
                .then_with(|| a.videoid.cmp(&b.videoid))
        });
        Ok(records)
    }

    pub fn list_page(&self, page: usize, per_page: usize) -> Result<Page<VideoRecord>> {
        Ok(Page::of(self.list()?, page, per_page))
    }
}

#[cfg(test)]
pub(crate) fn sample_record(videoid: &str, cached_at: DateTime<Utc>) -> VideoRecord {
    VideoRecord {
        videoid: videoid.into(),
        title: format!("Video {videoid}"),
        description: String::new(),
        uploader: Some("Channel".into()),
        channel_url: None,
        duration: Some(60),
        views: None,
        upload_date: Some("20240101".into()),
        thumbnail_url: None,
        tags: vec!["tech".into()],
        source_url: format!("https://www.youtube.com/watch?v={videoid}"),
        media_path: None,
        cached_at,
    }
}
