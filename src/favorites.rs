#![forbid(unsafe_code)]

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use anyhow::{Result, bail};
use parking_lot::Mutex;

use crate::store::{is_safe_segment, read_json, write_json_atomic};

pub const FAVORITES_FILE: &str = "favorites.json";

/// User-curated set of video ids, persisted as a sorted JSON array.
pub struct FavoritesStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl FavoritesStore {
    pub fn new(media_root: &Path) -> Self {
        Self {
            path: media_root.join(FAVORITES_FILE),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<BTreeSet<String>> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.into_iter().collect())
    }

    /// Returns `true` when the id was not already a favorite.
    pub fn add(&self, videoid: &str) -> Result<bool> {
        if !is_safe_segment(videoid) {
            bail!("invalid video id: {videoid:?}");
        }
        let _guard = self.lock.lock();
        let mut favorites = self.load()?;
        let inserted = favorites.insert(videoid.to_string());
        if inserted {
            write_json_atomic(&self.path, &favorites)?;
        }
        Ok(inserted)
    }

    /// Returns `true` when the id was a favorite.
    pub fn remove(&self, videoid: &str) -> Result<bool> {
        let _guard = self.lock.lock();
        let mut favorites = self.load()?;
        let removed = favorites.remove(videoid);
        if removed {
            write_json_atomic(&self.path, &favorites)?;
        }
        Ok(removed)
    }
}
