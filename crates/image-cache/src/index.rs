//! Persisted metadata index
//!
//! The whole index is stored as a single JSON blob under the well-known
//! storage key [`INDEX_KEY`]. Every save overwrites the previous blob; a
//! blob that cannot be read back is treated as an empty index so the cache
//! simply starts cold.

use crate::error::{CacheError, Result};
use crate::types::CacheEntry;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::{self, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Storage key of the persisted index blob
pub const INDEX_KEY: &str = "imageCacheIndex";

/// Bumped whenever the blob layout changes; older blobs load as empty
const FORMAT_VERSION: u32 = 1;

/// Cache key -> entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace the entry for `key`
    pub fn insert(&mut self, key: String, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(key, entry)
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, CacheEntry> {
        self.entries.iter()
    }
}

impl FromIterator<(String, CacheEntry)> for CacheIndex {
    fn from_iter<I: IntoIterator<Item = (String, CacheEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for CacheIndex {
    type Item = (String, CacheEntry);
    type IntoIter = hash_map::IntoIter<String, CacheEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[derive(Serialize)]
struct IndexBlobRef<'a> {
    version: u32,
    entries: &'a CacheIndex,
}

#[derive(Deserialize)]
struct IndexBlob {
    version: u32,
    entries: CacheIndex,
}

/// Loads and persists the [`CacheIndex`] blob
#[derive(Debug, Clone)]
pub struct IndexStore {
    path: PathBuf,
}

impl IndexStore {
    /// Store the blob as `<storage_dir>/imageCacheIndex.json`
    pub fn new(storage_dir: &Path) -> Self {
        Self {
            path: storage_dir.join(format!("{}.json", INDEX_KEY)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted index. Absent, unreadable or corrupt blobs yield an
    /// empty index.
    pub async fn load(&self) -> CacheIndex {
        match self.try_load().await {
            Ok(index) => index,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Discarding unreadable cache index");
                CacheIndex::new()
            }
        }
    }

    /// Like [`load`](Self::load) but reports why the blob was rejected
    pub async fn try_load(&self) -> Result<CacheIndex> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CacheIndex::new()),
            Err(e) => return Err(e.into()),
        };

        let blob: IndexBlob = serde_json::from_slice(&bytes)?;
        if blob.version != FORMAT_VERSION {
            debug!(
                found = blob.version,
                expected = FORMAT_VERSION,
                "Cache index version changed, starting cold"
            );
            return Ok(CacheIndex::new());
        }

        Ok(blob.entries)
    }

    /// Persist the full index, replacing the previous blob
    pub async fn save(&self, index: &CacheIndex) -> Result<()> {
        let blob = IndexBlobRef {
            version: FORMAT_VERSION,
            entries: index,
        };
        let bytes = serde_json::to_vec(&blob)
            .map_err(|e| CacheError::IndexCorrupt(format!("failed to serialize index: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Readers never see a half-written blob
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!(entries = index.len(), "Saved cache index");
        Ok(())
    }

    /// Remove the persisted blob. An absent blob is not an error.
    pub async fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
