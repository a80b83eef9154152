//! Cache key derivation

use sha2::{Digest, Sha256};

/// Derive the cache key for a URL: SHA-256 of the URL as lowercase hex
pub fn derive_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}
