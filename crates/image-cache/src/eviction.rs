//! Size-bounded eviction
//!
//! Once the indexed total exceeds the ceiling, the oldest entries are
//! dropped until the total falls to the low-water mark rather than just
//! under the ceiling, so a cache sitting near its limit does not evict on
//! every single insert.
//!
//! Each run sorts the whole index, O(n log n) per insert. That is fine for
//! a few thousand images but is the first thing to revisit if the index
//! grows much larger.

use crate::index::CacheIndex;
use std::path::PathBuf;
use tracing::debug;

pub const DEFAULT_LOW_WATER_RATIO: f64 = 0.8;

/// Result of an eviction pass. The caller deletes `removed_files` and
/// persists `index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionOutcome {
    pub index: CacheIndex,
    pub removed_files: Vec<PathBuf>,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    low_water_ratio: f64,
}

impl EvictionPolicy {
    pub fn new(low_water_ratio: f64) -> Self {
        Self { low_water_ratio }
    }

    /// Size eviction drives the cache down to once `max_size` is exceeded
    pub fn low_water_mark(&self, max_size: u64) -> u64 {
        (max_size as f64 * self.low_water_ratio) as u64
    }

    pub fn maybe_evict(&self, index: CacheIndex, max_size: u64) -> EvictionOutcome {
        let total_size = index.total_size();
        if total_size <= max_size {
            return EvictionOutcome {
                index,
                removed_files: Vec::new(),
                bytes_freed: 0,
            };
        }

        let target = self.low_water_mark(max_size);

        // Oldest first; key breaks ties so the order is deterministic
        let mut ordered: Vec<_> = index.into_iter().collect();
        ordered.sort_by(|(ka, a), (kb, b)| a.cached_at.cmp(&b.cached_at).then_with(|| ka.cmp(kb)));

        let mut current_size = total_size;
        let mut removed_files = Vec::new();
        let mut remaining = ordered.into_iter();

        while current_size > target {
            let Some((key, entry)) = remaining.next() else {
                break;
            };
            debug!(key = %key, size = entry.size_bytes, "Evicting cache entry");
            current_size = current_size.saturating_sub(entry.size_bytes);
            removed_files.push(entry.file_path);
        }

        EvictionOutcome {
            index: remaining.collect(),
            removed_files,
            bytes_freed: total_size - current_size,
        }
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_WATER_RATIO)
    }
}
