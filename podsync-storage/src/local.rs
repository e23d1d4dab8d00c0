//! Local filesystem provider.

use crate::error::StorageResult;
use crate::StorageProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores the pod blob at a fixed filesystem path.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous pod intact.
#[derive(Debug, Clone)]
pub struct LocalFileProvider {
    path: PathBuf,
    name: String,
}

impl LocalFileProvider {
    /// Creates a provider for the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, name }
    }

    /// Returns the backing path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut p = self.path.clone();
        p.set_extension("tmp");
        p
    }
}

#[async_trait]
impl StorageProvider for LocalFileProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> StorageResult<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, bytes: &[u8]) -> StorageResult<()> {
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), len = bytes.len(), "pod written");
        Ok(())
    }

    async fn last_modified(&self) -> StorageResult<Option<DateTime<Utc>>> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                let modified = meta.modified()?;
                Ok(Some(DateTime::<Utc>::from(modified)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
