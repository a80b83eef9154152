//! On-disk cache root

use crate::error::Result;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const PARTIAL_SUFFIX: &str = "part";

/// Owns the flat directory that holds cached image files
#[derive(Debug, Clone)]
pub struct CacheDirectory {
    root: PathBuf,
}

impl CacheDirectory {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root (and parents) if absent
    pub async fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Recursively delete the root. A missing root is not an error.
    pub async fn remove_all(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of the regular files currently under the root
    pub async fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        Ok(names)
    }
}

/// `<dest>.part`
pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    dest.with_file_name(name)
}

/// Cache key a file name belongs to, stripping the partial-download suffix
pub(crate) fn key_of(file_name: &str) -> &str {
    file_name
        .strip_suffix(PARTIAL_SUFFIX)
        .and_then(|s| s.strip_suffix('.'))
        .unwrap_or(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_path_for_is_pure_composition() {
        let dir = CacheDirectory::new(PathBuf::from("/nonexistent/images"));
        assert_eq!(dir.path_for("abc"), PathBuf::from("/nonexistent/images/abc"));
        assert_eq!(
            partial_path(&dir.path_for("abc")),
            PathBuf::from("/nonexistent/images/abc.part")
        );
    }

    #[test]
    fn test_key_of() {
        assert_eq!(key_of("abc"), "abc");
        assert_eq!(key_of("abc.part"), "abc");
    }

    #[tokio::test]
    async fn test_ensure_exists_is_idempotent() {
        let tmp = tempdir().unwrap();
        let dir = CacheDirectory::new(tmp.path().join("a").join("b"));

        dir.ensure_exists().await.unwrap();
        dir.ensure_exists().await.unwrap();

        assert!(dir.root().is_dir());
    }

    #[tokio::test]
    async fn test_remove_all_and_list_files() {
        let tmp = tempdir().unwrap();
        let dir = CacheDirectory::new(tmp.path().join("images"));

        // Missing root
        assert!(dir.list_files().await.unwrap().is_empty());
        dir.remove_all().await.unwrap();

        dir.ensure_exists().await.unwrap();
        std::fs::write(dir.path_for("one"), b"1").unwrap();
        std::fs::write(partial_path(&dir.path_for("two")), b"2").unwrap();
        std::fs::create_dir(dir.root().join("nested")).unwrap();

        let mut files = dir.list_files().await.unwrap();
        files.sort();
        assert_eq!(files, vec!["one".to_string(), "two.part".to_string()]);

        dir.remove_all().await.unwrap();
        assert!(!dir.root().exists());
    }
}
