//! Image cache façade
//!
//! Answers "give me a local path for this URL": looks the URL up in the
//! persisted index, checks expiry and file presence, and on a miss downloads
//! the image, records it and enforces the size budget.
//!
//! Two locks keep this consistent under concurrent callers:
//! - `index_lock` serializes every load -> mutate -> save of the index blob so
//!   inserts for unrelated URLs are never lost.
//! - `in_flight` maps each key being filled to the shared result of its
//!   download. Concurrent misses for the same URL await that result, error
//!   included, instead of repeating the download.
//!
//! Downloads run on a spawned task that removes its own `in_flight` entry
//! after committing, so a caller that gives up on `get` does not cancel a
//! download that is already running.

use crate::config::ImageCacheConfig;
use crate::directory::{key_of, CacheDirectory};
use crate::downloader::{Downloader, HttpDownloader};
use crate::error::{CacheError, Result};
use crate::eviction::EvictionPolicy;
use crate::expiry::ExpiryPolicy;
use crate::index::{CacheIndex, IndexStore};
use crate::key::derive_key;
use crate::types::{format_size, CacheEntry, CacheStats, PruneReport};
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of one download, awaited by every caller that asked for the key
type PendingFill = Shared<BoxFuture<'static, std::result::Result<PathBuf, Arc<CacheError>>>>;

/// Disk-backed image cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: ImageCacheConfig,
    directory: CacheDirectory,
    store: IndexStore,
    downloader: Arc<dyn Downloader>,
    expiry: ExpiryPolicy,
    eviction: EvictionPolicy,
    index_lock: Mutex<()>,
    in_flight: Mutex<HashMap<String, PendingFill>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ImageCache {
    /// Create a cache that downloads over HTTP
    pub fn new(config: ImageCacheConfig) -> Result<Self> {
        let downloader = HttpDownloader::new(config.fetch_timeout)?;
        Ok(Self::with_downloader(config, Arc::new(downloader)))
    }

    pub fn with_downloader(config: ImageCacheConfig, downloader: Arc<dyn Downloader>) -> Self {
        let config = config.validated();
        let inner = Inner {
            directory: CacheDirectory::new(config.images_dir()),
            store: IndexStore::new(&config.cache_dir),
            expiry: ExpiryPolicy::new(config.cache_expiry),
            eviction: EvictionPolicy::new(config.low_water_ratio),
            downloader,
            index_lock: Mutex::new(()),
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &ImageCacheConfig {
        &self.inner.config
    }

    /// Ensure the cache directory exists
    pub async fn init(&self) -> Result<()> {
        self.inner.directory.ensure_exists().await?;
        info!(
            cache_dir = ?self.inner.config.cache_dir,
            max_cache_size = self.inner.config.max_cache_size,
            expiry_secs = self.inner.config.cache_expiry.num_seconds(),
            "Image cache initialized"
        );
        Ok(())
    }

    /// Local path for `url`, or `None` when the caller should load the
    /// remote URL directly. Never fails.
    pub async fn get_cached_image(&self, url: &str) -> Option<PathBuf> {
        match self.get(url).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(url = %url, error = %e, "Image cache unavailable, using remote URL");
                None
            }
        }
    }

    /// Local path for `url`, downloading it on a miss
    pub async fn get(&self, url: &str) -> Result<PathBuf> {
        let key = derive_key(url);

        if let Some(path) = self.inner.lookup(&key).await? {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache hit");
            return Ok(path);
        }

        let (fill, joined) = self.inner.pending_fill(&key, url).await;
        let path = fill.await?;
        if joined {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(path)
    }

    /// Size and entry count of the persisted index
    pub async fn stats(&self) -> CacheStats {
        let index = self.inner.store.load().await;
        let total_size_bytes = index.total_size();
        CacheStats {
            total_size_bytes,
            total_files: index.len(),
            formatted_size: format_size(total_size_bytes),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
        }
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.stats().await
    }

    /// Remove every cached image and the index
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.inner.index_lock.lock().await;
        self.inner.directory.remove_all().await?;
        self.inner.store.delete().await?;
        self.inner.directory.ensure_exists().await?;
        info!(cache_dir = ?self.inner.config.cache_dir, "Image cache cleared");
        Ok(())
    }

    pub async fn clear_image_cache(&self) -> bool {
        match self.clear().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to clear image cache");
                false
            }
        }
    }

    /// Drop expired entries, entries whose file vanished, and files no entry
    /// references, then enforce the size budget
    pub async fn prune(&self) -> Result<PruneReport> {
        self.inner.prune().await
    }
}

impl Inner {
    /// Cached path for `key` if the entry is fresh and its file is present.
    /// Stale or dangling entries are removed on the way.
    async fn lookup(&self, key: &str) -> Result<Option<PathBuf>> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.store.load().await;

        let Some(entry) = index.get(key).cloned() else {
            return Ok(None);
        };

        if self.expiry.is_expired(&entry, Utc::now()) {
            debug!(key = %key, cached_at = %entry.cached_at, "Cache entry expired");
            index.remove(key);
            remove_file_quietly(&entry.file_path).await;
            self.store.save(&index).await?;
            return Ok(None);
        }

        if !file_exists(&entry.file_path).await {
            warn!(key = %key, path = ?entry.file_path, "Cached file missing, removing entry");
            index.remove(key);
            self.store.save(&index).await?;
            return Ok(None);
        }

        Ok(Some(entry.file_path))
    }

    async fn lookup_or_fill(&self, key: &str, url: &str) -> Result<PathBuf> {
        // A download that just finished may have filled the entry
        if let Some(path) = self.lookup(key).await? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache hit after in-flight download");
            return Ok(path);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, url = %url, "Cache miss");
        self.fill(key, url).await
    }

    async fn fill(&self, key: &str, url: &str) -> Result<PathBuf> {
        self.directory.ensure_exists().await?;
        let dest = self.directory.path_for(key);
        let size = self.downloader.fetch(url, &dest).await?;

        let entry = CacheEntry {
            url: url.to_string(),
            file_path: dest.clone(),
            cached_at: Utc::now(),
            size_bytes: size,
        };

        let _guard = self.index_lock.lock().await;
        let mut index = self.store.load().await;
        index.insert(key.to_string(), entry);
        if let Err(e) = self.store.save(&index).await {
            remove_file_quietly(&dest).await;
            return Err(e);
        }
        debug!(key = %key, size, "Cached image");

        let index = self.evict(index).await?;
        if !index.contains_key(key) {
            return Err(CacheError::ExceedsCapacity {
                size,
                limit: self.eviction.low_water_mark(self.config.max_cache_size),
            });
        }

        Ok(dest)
    }

    /// Run the eviction policy, delete evicted files and persist the result.
    /// Caller holds `index_lock`.
    async fn evict(&self, index: CacheIndex) -> Result<CacheIndex> {
        let outcome = self.eviction.maybe_evict(index, self.config.max_cache_size);
        if outcome.removed_files.is_empty() {
            return Ok(outcome.index);
        }

        for path in &outcome.removed_files {
            remove_file_quietly(path).await;
        }
        self.store.save(&outcome.index).await?;

        info!(
            evicted = outcome.removed_files.len(),
            bytes_freed = outcome.bytes_freed,
            remaining = outcome.index.total_size(),
            "Evicted cache entries"
        );
        Ok(outcome.index)
    }

    async fn prune(&self) -> Result<PruneReport> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.store.load().await;
        let mut report = PruneReport::default();
        let now = Utc::now();

        let entries: Vec<(String, CacheEntry)> =
            index.iter().map(|(k, e)| (k.clone(), e.clone())).collect();
        for (key, entry) in entries {
            if self.expiry.is_expired(&entry, now) {
                index.remove(&key);
                remove_file_quietly(&entry.file_path).await;
                report.expired += 1;
                report.bytes_freed += entry.size_bytes;
            } else if !file_exists(&entry.file_path).await {
                index.remove(&key);
                report.missing += 1;
            }
        }

        // Snapshot after listing: a download still in `in_flight` cannot
        // commit while we hold `index_lock`
        let files = self.directory.list_files().await?;
        let busy: HashSet<String> = self.in_flight.lock().await.keys().cloned().collect();
        for name in files {
            let key = key_of(&name);
            let referenced = name == key && index.contains_key(key);
            if referenced || busy.contains(key) {
                continue;
            }

            let path = self.directory.root().join(&name);
            let size = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            if remove_file_quietly(&path).await {
                debug!(file = %name, size, "Removed orphaned cache file");
                report.orphans += 1;
                report.bytes_freed += size;
            }
        }

        if report.expired > 0 || report.missing > 0 {
            self.store.save(&index).await?;
        }

        let before = index.len();
        let freed_before = index.total_size();
        let index = self.evict(index).await?;
        report.evicted = before - index.len();
        report.bytes_freed += freed_before - index.total_size();

        info!(
            expired = report.expired,
            missing = report.missing,
            orphans = report.orphans,
            evicted = report.evicted,
            bytes_freed = report.bytes_freed,
            "Pruned image cache"
        );
        Ok(report)
    }

    /// Join the download running for `key`, or start one on a spawned task.
    /// The flag is true when an existing download was joined.
    async fn pending_fill(self: &Arc<Self>, key: &str, url: &str) -> (PendingFill, bool) {
        let mut pending = self.in_flight.lock().await;
        if let Some(fill) = pending.get(key).filter(|fill| fill.peek().is_none()) {
            debug!(key = %key, "Joining in-flight download");
            return (fill.clone(), true);
        }

        let inner = Arc::clone(self);
        let task_key = key.to_string();
        let url = url.to_string();
        let task = tokio::spawn(async move {
            let result = inner.lookup_or_fill(&task_key, &url).await;
            inner.in_flight.lock().await.remove(&task_key);
            result.map_err(Arc::new)
        });

        let fill = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(CacheError::from(e))),
            }
        }
        .boxed()
        .shared();

        pending.insert(key.to_string(), fill.clone());
        (fill, false)
    }
}

async fn file_exists(path: &Path) -> bool {
    matches!(fs::try_exists(path).await, Ok(true))
}

/// Delete a cached file, tolerating it already being gone
async fn remove_file_quietly(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = ?path, error = %e, "Failed to remove cached file");
            false
        }
    }
}
