//! Cache configuration

use crate::eviction::DEFAULT_LOW_WATER_RATIO;
use chrono::Duration;
use std::env;
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_CACHE_DIR: &str = "./cache";
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 100 * 1024 * 1024; // 100 MiB
pub const DEFAULT_CACHE_EXPIRY_SECS: i64 = 7 * 24 * 60 * 60; // 7 days
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Configuration for the image cache
#[derive(Debug, Clone)]
pub struct ImageCacheConfig {
    /// Base directory; images live in `<cache_dir>/images`, the index next to it
    pub cache_dir: PathBuf,
    pub max_cache_size: u64,
    pub cache_expiry: Duration,
    /// Fraction of `max_cache_size` eviction drives the cache down to
    pub low_water_ratio: f64,
    pub fetch_timeout: std::time::Duration,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            cache_expiry: Duration::seconds(DEFAULT_CACHE_EXPIRY_SECS),
            low_water_ratio: DEFAULT_LOW_WATER_RATIO,
            fetch_timeout: std::time::Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}

impl ImageCacheConfig {
    /// Parse configuration from environment variables, falling back to
    /// defaults for anything missing or unparseable
    pub fn from_env() -> Self {
        let cache_dir = env::var("IMAGE_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CACHE_DIR));

        let max_cache_size = env::var("MAX_CACHE_SIZE")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_MAX_CACHE_SIZE);

        let cache_expiry = parse_expiry(env::var("CACHE_EXPIRY_SECS").ok().as_deref());

        let low_water_ratio = env::var("CACHE_LOW_WATER_RATIO")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(DEFAULT_LOW_WATER_RATIO);

        let fetch_timeout = env::var("FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(std::time::Duration::from_secs)
            .unwrap_or(std::time::Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS));

        Self {
            cache_dir,
            max_cache_size,
            cache_expiry,
            low_water_ratio,
            fetch_timeout,
        }
        .validated()
    }

    /// Replace out-of-range values with defaults
    pub fn validated(mut self) -> Self {
        if !(self.low_water_ratio > 0.0 && self.low_water_ratio <= 1.0) {
            warn!(
                ratio = self.low_water_ratio,
                "Low-water ratio must be in (0, 1], using default"
            );
            self.low_water_ratio = DEFAULT_LOW_WATER_RATIO;
        }
        self
    }

    pub fn images_dir(&self) -> PathBuf {
        self.cache_dir.join("images")
    }
}

/// Expiry in whole seconds; negative, unparseable or out-of-range values
/// give the default
fn parse_expiry(value: Option<&str>) -> Duration {
    value
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|secs| *secs >= 0)
        .and_then(Duration::try_seconds)
        .unwrap_or_else(|| Duration::seconds(DEFAULT_CACHE_EXPIRY_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ImageCacheConfig::default();
        assert_eq!(config.cache_dir, PathBuf::from("./cache"));
        assert_eq!(config.max_cache_size, 100 * 1024 * 1024);
        assert_eq!(config.cache_expiry, Duration::days(7));
        assert_eq!(config.low_water_ratio, 0.8);
        assert_eq!(config.images_dir(), PathBuf::from("./cache/images"));
    }

    #[test]
    fn test_parse_expiry() {
        assert_eq!(parse_expiry(Some("60")), Duration::seconds(60));
        assert_eq!(parse_expiry(Some("0")), Duration::zero());

        let default = Duration::days(7);
        assert_eq!(parse_expiry(None), default);
        assert_eq!(parse_expiry(Some("-5")), default);
        assert_eq!(parse_expiry(Some("a week")), default);
        assert_eq!(parse_expiry(Some("9223372036854775807")), default);
        assert_eq!(parse_expiry(Some("9223372036854776")), default);
    }

    #[test]
    fn test_invalid_ratio_falls_back() {
        for ratio in [0.0, -0.5, 1.5, f64::NAN] {
            let config = ImageCacheConfig {
                low_water_ratio: ratio,
                ..Default::default()
            }
            .validated();
            assert_eq!(config.low_water_ratio, DEFAULT_LOW_WATER_RATIO);
        }

        let config = ImageCacheConfig {
            low_water_ratio: 1.0,
            ..Default::default()
        }
        .validated();
        assert_eq!(config.low_water_ratio, 1.0);
    }
}
