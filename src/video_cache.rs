#![forbid(unsafe_code)]

//! Local cache of YouTube videos downloaded through `yt-dlp`.
//!
//! Layout under the media root:
//!
//! * `index.json` maps each requested watch URL to the media file on disk,
//! * `<id>.<ext>` and `<id>.info.json` are written by `yt-dlp`,
//! * `metadata/<id>.json` holds the normalized [`VideoRecord`].
//!
//! A prefetch probes the video once, then tries the smallest muxed stream
//! first and falls back to each muxed webm format until one download works.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    decode::ProxiedPath,
    metadata::{MetadataStore, VideoRecord},
    store::{read_json, write_json_atomic},
};

pub const VIDEO_INDEX_FILE: &str = "index.json";
pub const DEFAULT_YT_DLP: &str = "yt-dlp";
const WATCH_MARKER: &str = "youtube.com/watch?";
const INFO_JSON_SUFFIX: &str = ".info.json";
const OUTPUT_TEMPLATE: &str = "%(id)s.%(ext)s";

type VideoIndex = BTreeMap<String, PathBuf>;

/// Subset of `yt-dlp --dump-single-json` we care about.
#[derive(Debug, Deserialize)]
struct ProbeInfo {
    id: String,
    title: Option<String>,
    description: Option<String>,
    uploader: Option<String>,
    channel_url: Option<String>,
    duration: Option<f64>,
    view_count: Option<i64>,
    upload_date: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    formats: Vec<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_id: Option<String>,
    format: Option<String>,
    ext: Option<String>,
}

#[derive(Deserialize)]
struct InfoJsonId {
    id: String,
}

/// Turns a router path into the YouTube watch URL it refers to, if any.
/// Paths without an explicit scheme marker default to `https`.
pub fn watch_url(path: &str) -> Option<String> {
    if !path.contains(WATCH_MARKER) {
        return None;
    }
    Some(match ProxiedPath::classify(path) {
        ProxiedPath::Absolute { protocol, rest } => format!("{}{rest}", protocol.url_prefix()),
        ProxiedPath::Relative(rest) if rest.starts_with("http") => rest.to_string(),
        ProxiedPath::Relative(rest) => format!("https://{rest}"),
        ProxiedPath::Home => return None,
    })
}

pub struct VideoCache {
    root: PathBuf,
    yt_dlp: PathBuf,
    metadata: Arc<MetadataStore>,
    // yt-dlp output and the index share one directory; one prefetch at a time.
    lock: Mutex<()>,
}

impl VideoCache {
    pub fn new(
        root: impl Into<PathBuf>,
        yt_dlp: impl Into<PathBuf>,
        metadata: Arc<MetadataStore>,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).with_context(|| format!("creating {}", root.display()))?;
        Ok(Self {
            root,
            yt_dlp: yt_dlp.into(),
            metadata,
            lock: Mutex::new(()),
        })
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(VIDEO_INDEX_FILE)
    }

    fn load_index(&self) -> Result<VideoIndex> {
        Ok(read_json(&self.index_path())?.unwrap_or_default())
    }

    /// Media file already on disk for `url`, without touching `yt-dlp`.
    pub fn cached_path(&self, url: &str) -> Result<Option<PathBuf>> {
        let _guard = self.lock.lock();
        Ok(self
            .load_index()?
            .remove(url)
            .filter(|path| path.is_file()))
    }

    /// Returns the local media file for `url`, downloading it first when the
    /// index has no usable entry.
    pub fn prefetch(&self, url: &str) -> Result<PathBuf> {
        let _guard = self.lock.lock();
        let mut index = self.load_index()?;
        if let Some(path) = index.get(url)
            && path.is_file()
        {
            debug!(url, path = %path.display(), "video already fetched");
            return Ok(path.clone());
        }

        let probe = self.probe(url)?;
        let formats = candidate_formats(&probe.formats);
        for format in &formats {
            if self.download(url, format) {
                break;
            }
        }

        let media = find_media_file(&self.root, &probe.id)?
            .ok_or_else(|| anyhow!("no media file downloaded for {url}"))?;
        info!(url, path = %media.display(), "video cached");

        let record = video_record(probe, url, &media);
        self.metadata
            .put(&record)
            .with_context(|| format!("storing metadata for {}", record.videoid))?;

        index.insert(url.to_string(), media.clone());
        write_json_atomic(&self.index_path(), &index)?;
        Ok(media)
    }

    fn probe(&self, url: &str) -> Result<ProbeInfo> {
        let output = Command::new(&self.yt_dlp)
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg(url)
            .output()
            .with_context(|| format!("running {} for {url}", self.yt_dlp.display()))?;
        if !output.status.success() {
            bail!("metadata probe failed for {url} (status {})", output.status);
        }
        serde_json::from_slice(&output.stdout).context("parsing yt-dlp metadata")
    }

    fn download(&self, url: &str, format: &str) -> bool {
        debug!(url, format, "downloading format");
        let status = Command::new(&self.yt_dlp)
            .arg("-f")
            .arg(format)
            .arg("--no-playlist")
            .arg("--write-info-json")
            .arg("--output")
            .arg(self.root.join(OUTPUT_TEMPLATE))
            .arg(url)
            .status();
        match status {
            Ok(status) if status.success() => true,
            Ok(status) => {
                warn!(url, format, "download exited with {status}");
                false
            }
            Err(err) => {
                warn!(url, format, "could not launch download: {err}");
                false
            }
        }
    }
}

/// `worst` first, then every muxed webm stream in listing order.
fn candidate_formats(formats: &[ProbeFormat]) -> Vec<String> {
    let mut candidates = vec!["worst".to_string()];
    for format in formats {
        let description = format.format.as_deref().unwrap_or_default();
        if description.contains("audio only") || description.contains("video only") {
            continue;
        }
        if format.ext.as_deref() != Some("webm") {
            continue;
        }
        if let Some(id) = format.format_id.as_deref().map(str::trim)
            && !id.is_empty()
            && !candidates.iter().any(|existing| existing == id)
        {
            candidates.push(id.to_string());
        }
    }
    candidates
}

/// Locates the media file whose `.info.json` sibling names `videoid`.
fn find_media_file(root: &Path, videoid: &str) -> Result<Option<PathBuf>> {
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        let Some(stem) = name.strip_suffix(INFO_JSON_SUFFIX) else {
            continue;
        };
        let matches = match read_json::<InfoJsonId>(entry.path()) {
            Ok(Some(info)) => info.id == videoid,
            Ok(None) => false,
            Err(err) => {
                warn!("skipping unreadable info file: {err:#}");
                false
            }
        };
        if matches && let Some(media) = media_sibling(root, stem)? {
            return Ok(Some(media));
        }
    }
    Ok(None)
}

fn media_sibling(root: &Path, stem: &str) -> Result<Option<PathBuf>> {
    let prefix = format!("{stem}.");
    let mut found = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("listing {}", root.display()))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(ext) = name.strip_prefix(&prefix) else {
            continue;
        };
        if ext.contains('.') || matches!(ext, "json" | "part" | "ytdl" | "tmp" | "description") {
            continue;
        }
        if entry.file_type().is_ok_and(|kind| kind.is_file()) {
            found.push(entry.path());
        }
    }
    found.sort_by_key(|path| {
        let is_webm = path.extension().and_then(|ext| ext.to_str()) == Some("webm");
        (!is_webm, path.clone())
    });
    Ok(found.into_iter().next())
}

fn video_record(probe: ProbeInfo, url: &str, media: &Path) -> VideoRecord {
    VideoRecord {
        title: probe.title.unwrap_or_else(|| probe.id.clone()),
        videoid: probe.id,
        description: probe.description.unwrap_or_default(),
        uploader: probe.uploader,
        channel_url: probe.channel_url,
        duration: probe.duration.map(|seconds| seconds.round() as i64),
        views: probe.view_count,
        upload_date: probe.upload_date,
        thumbnail_url: probe.thumbnail,
        tags: probe.tags.unwrap_or_default(),
        source_url: url.to_string(),
        media_path: Some(media.to_string_lossy().into_owned()),
        cached_at: Utc::now(),
    }
}
