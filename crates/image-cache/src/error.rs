//! Error types for the image cache

use std::fmt;
use std::sync::Arc;

/// Reasons a remote image could not be fetched
#[derive(Debug)]
pub enum DownloadError {
    /// Connection could not be established or dropped mid-transfer
    NetworkUnavailable(String),
    /// Server answered with a non-success status
    HttpStatus(u16),
    Timeout,
    /// Writing the destination file failed
    Io(Box<std::io::Error>),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::NetworkUnavailable(msg) => write!(f, "Network unavailable: {}", msg),
            DownloadError::HttpStatus(status) => write!(f, "HTTP status {}", status),
            DownloadError::Timeout => write!(f, "Download timed out"),
            DownloadError::Io(err) => write!(f, "IO error while downloading: {}", err),
        }
    }
}

impl std::error::Error for DownloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DownloadError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        DownloadError::Io(Box::new(err))
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DownloadError::Timeout
        } else if let Some(status) = err.status() {
            DownloadError::HttpStatus(status.as_u16())
        } else {
            DownloadError::NetworkUnavailable(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum CacheError {
    Io(Box<std::io::Error>),
    Download(DownloadError),
    IndexCorrupt(String),
    /// A freshly stored image was evicted immediately because it alone
    /// exceeds the low-water budget
    ExceedsCapacity { size: u64, limit: u64 },
    /// The background download task panicked or was aborted
    Task(String),
    /// Failure of a download this caller waited on instead of starting
    Shared(Arc<CacheError>),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Download(err) => write!(f, "Download error: {}", err),
            CacheError::IndexCorrupt(msg) => write!(f, "Index corrupt: {}", msg),
            CacheError::ExceedsCapacity { size, limit } => write!(
                f,
                "Image of {} bytes does not fit the {} byte cache budget",
                size, limit
            ),
            CacheError::Task(msg) => write!(f, "Download task failed: {}", msg),
            CacheError::Shared(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            CacheError::Download(err) => Some(err),
            CacheError::Shared(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<DownloadError> for CacheError {
    fn from(err: DownloadError) -> Self {
        CacheError::Download(err)
    }
}

impl From<Arc<CacheError>> for CacheError {
    /// Take the error back out when no other waiter still holds it
    fn from(err: Arc<CacheError>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(CacheError::Shared)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::IndexCorrupt(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        CacheError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_download_error_display() {
        assert_eq!(
            format!("{}", DownloadError::HttpStatus(404)),
            "HTTP status 404"
        );
        assert_eq!(format!("{}", DownloadError::Timeout), "Download timed out");
        assert_eq!(
            format!("{}", DownloadError::NetworkUnavailable("refused".to_string())),
            "Network unavailable: refused"
        );
    }

    #[test]
    fn test_cache_error_wraps_download_error() {
        let err: CacheError = DownloadError::HttpStatus(503).into();
        assert_eq!(format!("{}", err), "Download error: HTTP status 503");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_io_error_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CacheError = io.into();
        assert!(format!("{}", err).contains("denied"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_exceeds_capacity_display() {
        let err = CacheError::ExceedsCapacity {
            size: 2048,
            limit: 1024,
        };
        assert_eq!(
            format!("{}", err),
            "Image of 2048 bytes does not fit the 1024 byte cache budget"
        );
    }

    #[test]
    fn test_shared_error_unwraps_when_sole_owner() {
        let shared = Arc::new(CacheError::Download(DownloadError::Timeout));
        let held = Arc::clone(&shared);

        let waiter: CacheError = shared.into();
        assert!(matches!(waiter, CacheError::Shared(_)));
        assert_eq!(format!("{}", waiter), "Download error: Download timed out");
        assert!(waiter.source().is_some());
        drop(waiter);

        let last: CacheError = held.into();
        assert!(matches!(last, CacheError::Download(DownloadError::Timeout)));
    }

    #[test]
    fn test_error_is_debug() {
        let err = CacheError::IndexCorrupt("bad json".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("IndexCorrupt"));
    }
}
