//! Image cache CLI
//!
//! Drives the disk-backed image cache from the command line: resolve a URL
//! to a local file, inspect usage, clear or prune the cache.
//!
//! Configuration comes from the environment (`IMAGE_CACHE_DIR`,
//! `MAX_CACHE_SIZE`, `CACHE_EXPIRY_SECS`, `CACHE_LOW_WATER_RATIO`,
//! `FETCH_TIMEOUT_SECS`); flags override it.

mod error;

use crate::error::Result;
use chrono::Duration;
use clap::{Parser, Subcommand};
use image_cache::{ImageCache, ImageCacheConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Subscriber};
use tracing_subscriber::{fmt::MakeWriter, prelude::*, EnvFilter};

/// Command line interface for the image cache
#[derive(Debug, Parser)]
#[command(name = "image-cache", version, about = "Disk-backed image cache")]
struct Cli {
    /// Cache directory (overrides IMAGE_CACHE_DIR)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Size ceiling in bytes (overrides MAX_CACHE_SIZE)
    #[arg(long)]
    max_cache_size: Option<u64>,

    /// Entry lifetime in seconds (overrides CACHE_EXPIRY_SECS)
    #[arg(long)]
    expiry_secs: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the local path for URL, or URL itself if it could not be cached
    Get { url: String },
    /// Print cache statistics as JSON
    Stats,
    /// Remove every cached image
    Clear,
    /// Drop expired, dangling and orphaned files, then enforce the size budget
    Prune,
}

fn resolve_config(cli: &Cli, mut config: ImageCacheConfig) -> ImageCacheConfig {
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(size) = cli.max_cache_size {
        config.max_cache_size = size;
    }
    if let Some(secs) = cli.expiry_secs {
        config.cache_expiry = Duration::seconds(i64::from(secs));
    }
    config
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = resolve_config(&cli, ImageCacheConfig::from_env());
    let cache = ImageCache::new(config)?;
    cache.init().await?;

    match cli.command {
        Command::Get { url } => match cache.get_cached_image(&url).await {
            Some(path) => println!("{}", path.display()),
            None => println!("{}", url),
        },
        Command::Stats => {
            let stats = cache.cache_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Clear => {
            if !cache.clear_image_cache().await {
                return Ok(ExitCode::FAILURE);
            }
            info!("Cache cleared");
        }
        Command::Prune => {
            let report = cache.prune().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Log subscriber writing through `make_writer`, as Cloud Logging JSON when
/// `json` is set
fn log_subscriber<W>(json: bool, make_writer: W) -> Result<Box<dyn Subscriber + Send + Sync>>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::from_default_env().add_directive("image_cache=info".parse()?);

    if json {
        Ok(Box::new(
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer().with_writer(make_writer)),
        ))
    } else {
        Ok(Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(make_writer)
                .finish(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Use JSON format for Cloud Logging when LOG_FORMAT=json. Logs always go
    // to stderr; stdout carries command output.
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);
    log_subscriber(json, std::io::stderr)?.init();

    run(Cli::parse()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "image-cache",
            "--cache-dir",
            "/tmp/art",
            "--max-cache-size",
            "2048",
            "--expiry-secs",
            "60",
            "stats",
        ])
        .unwrap();

        let config = resolve_config(&cli, ImageCacheConfig::default());
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/art"));
        assert_eq!(config.max_cache_size, 2048);
        assert_eq!(config.cache_expiry.num_seconds(), 60);
        assert!(matches!(cli.command, Command::Stats));
    }

    #[test]
    fn test_missing_flags_keep_config() {
        let cli =
            Cli::try_parse_from(["image-cache", "get", "https://cdn.example.com/a.jpg"]).unwrap();

        let config = resolve_config(&cli, ImageCacheConfig::default());
        assert_eq!(config.max_cache_size, ImageCacheConfig::default().max_cache_size);
        match cli.command {
            Command::Get { url } => assert_eq!(url, "https://cdn.example.com/a.jpg"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_both_log_formats_use_the_given_writer() {
        for json in [false, true] {
            let captured = CapturedLogs::default();
            let writer = captured.clone();
            let subscriber = log_subscriber(json, move || writer.clone()).unwrap();

            tracing::subscriber::with_default(subscriber, || {
                info!(target: "image_cache", "Image cache initialized");
            });

            let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
            assert!(output.contains("Image cache initialized"), "{}", output);
            assert_eq!(output.trim_start().starts_with('{'), json);
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["image-cache"]).is_err());
    }

    #[tokio::test]
    async fn test_stats_on_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "image-cache",
            "--cache-dir",
            dir.path().to_str().unwrap(),
            "stats",
        ])
        .unwrap();

        let code = run(cli).await.unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
        assert!(dir.path().join("images").is_dir());
    }
}
