//! Disk-backed image cache with TTL expiration and size-bounded eviction
//!
//! Remote images are downloaded once, stored in a flat directory named by a
//! hash of their URL, and tracked in a persisted metadata index. Entries
//! expire after a fixed age and the oldest entries are evicted when the
//! cache grows past its size budget.

pub mod config;
pub mod directory;
pub mod downloader;
pub mod error;
pub mod eviction;
pub mod expiry;
pub mod index;
pub mod key;
pub mod service;
pub mod types;

pub use config::ImageCacheConfig;
pub use directory::CacheDirectory;
pub use downloader::{Downloader, HttpDownloader};
pub use error::{CacheError, DownloadError, Result};
pub use eviction::{EvictionOutcome, EvictionPolicy};
pub use expiry::ExpiryPolicy;
pub use index::{CacheIndex, IndexStore, INDEX_KEY};
pub use key::derive_key;
pub use service::ImageCache;
pub use types::{format_size, CacheEntry, CacheStats, PruneReport};
