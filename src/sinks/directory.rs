//! Directory-backed artifact sink.
//!
//! A container maps to `<root>/<container>/`. Each artifact is written to a
//! temporary sibling file first and then renamed over the target, so readers
//! never observe a half-written artifact and concurrent writers resolve to
//! last-write-wins.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::config::SinkConfig;
use crate::traits::{ArtifactSink, SinkError};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores artifacts as files inside one container directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    container: String,
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>, container: impl Into<String>) -> Result<Self, SinkError> {
        let container = container.into();
        let root = root.into();
        let dir = resolve_child(&root, Path::new(&container))?;
        Ok(Self { container, dir })
    }

    pub fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        Self::new(config.root.clone(), config.container.clone())
    }

    /// Directory holding this container's artifacts.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolves an artifact name inside the container, rejecting any name
    /// that would escape it.
    pub fn artifact_path(&self, name: &str) -> Result<PathBuf, SinkError> {
        resolve_child(&self.dir, Path::new(name))
    }
}

/// Joins `relative` onto `root`, rejecting absolute paths, `..` and empty names.
fn resolve_child(root: &Path, relative: &Path) -> Result<PathBuf, SinkError> {
    let invalid = || SinkError::InvalidName(relative.display().to_string());
    if relative.as_os_str().is_empty() || relative.is_absolute() {
        return Err(invalid());
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) | Component::CurDir => {
                return Err(invalid());
            }
        }
    }
    Ok(root.join(relative))
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    fn container(&self) -> &str {
        &self.container
    }

    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<(), SinkError> {
        let target = self.artifact_path(name)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = target.with_file_name(format!(
            ".{}.{}-{}.tmp",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = tokio::fs::write(&temp, &bytes).await {
            tokio::fs::remove_file(&temp).await.ok();
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            tokio::fs::remove_file(&temp).await.ok();
            return Err(e.into());
        }

        debug!(path = %target.display(), bytes = bytes.len(), "Artifact written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_creates_and_overwrites() {
        let root = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(root.path(), "results").unwrap();

        sink.put("a.csv", b"first".to_vec()).await.unwrap();
        sink.put("a.csv", b"second".to_vec()).await.unwrap();

        let path = root.path().join("results").join("a.csv");
        assert_eq!(std::fs::read(&path).unwrap(), b"second");

        // no temp files left behind
        let entries: Vec<_> = std::fs::read_dir(root.path().join("results"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_nested_names_are_allowed() {
        let root = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(root.path(), "results").unwrap();
        sink.put("2024/03/out.csv", b"x".to_vec()).await.unwrap();
        assert!(root.path().join("results/2024/03/out.csv").exists());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let sink = DirectorySink::new("/tmp/safe_root", "results").unwrap();

        assert!(sink.artifact_path("../../etc/passwd").is_err());
        assert!(sink.artifact_path("/etc/passwd").is_err());
        assert!(sink.artifact_path("").is_err());
        assert!(sink.artifact_path("sub/file.csv").is_ok());

        assert!(DirectorySink::new("/tmp/safe_root", "../escape").is_err());
        assert!(DirectorySink::new("/tmp/safe_root", "").is_err());
    }

    #[test]
    fn test_from_config() {
        let config = SinkConfig {
            root: PathBuf::from("/srv/artifacts"),
            container: "daily".to_string(),
            ..SinkConfig::default()
        };
        let sink = DirectorySink::from_config(&config).unwrap();
        assert_eq!(sink.container(), "daily");
        assert_eq!(sink.dir(), Path::new("/srv/artifacts/daily"));
    }
}
