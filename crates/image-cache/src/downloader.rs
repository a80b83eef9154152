//! Fetching remote images onto disk

use crate::directory::partial_path;
use crate::error::DownloadError;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const DEFAULT_USER_AGENT: &str = concat!("image-cache/", env!("CARGO_PKG_VERSION"));

/// Fetches the bytes behind a URL into a file.
///
/// Implementations must leave nothing at `dest` unless they return `Ok`.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Returns the number of bytes written to `dest`
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, DownloadError>;
}

/// HTTP downloader streaming response bodies to disk
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    async fn stream_to(
        &self,
        response: reqwest::Response,
        partial: &Path,
    ) -> Result<u64, DownloadError> {
        let mut file = File::create(partial).await?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        debug!(url = %url, "Fetching image");

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), url = %url, "Failed to fetch image");
            return Err(DownloadError::HttpStatus(response.status().as_u16()));
        }

        let partial = partial_path(dest);
        let written = match self.stream_to(response, &partial).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&partial, dest).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e.into());
        }

        debug!(url = %url, size = written, "Fetched image");
        Ok(written)
    }
}
