//! Local filesystem snapshot store.
//!
//! The snapshot is a pretty-printed JSON document so it can be inspected
//! or copied for backup between cycles. Writes go to a sibling temp file
//! that is renamed over the target, so readers see either the old or the
//! new snapshot, never a partial one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Snapshot;
use crate::storage::SnapshotStore;

/// JSON file snapshot store.
#[derive(Debug, Clone)]
pub struct LocalSnapshotStore {
    path: PathBuf,
}

impl LocalSnapshotStore {
    /// Create a store persisting to the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Temporary path used during atomic writes.
    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.ensure_dir().await?;

        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        let result = match written {
            Ok(()) => tokio::fs::rename(&tmp, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::Io(e));
        }
        Ok(())
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read and decode the snapshot, surfacing every failure.
    pub async fn try_load(&self) -> Result<Option<Snapshot>> {
        match self.read_bytes().await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete persisted state so the next run is a cold start.
    pub async fn clear(&self) -> Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[async_trait]
impl SnapshotStore for LocalSnapshotStore {
    async fn load(&self) -> Snapshot {
        match self.try_load().await {
            Ok(Some(snapshot)) => {
                log::info!(
                    "Loaded snapshot with {} listings from {}",
                    snapshot.len(),
                    self.path.display()
                );
                snapshot
            }
            Ok(None) => {
                log::info!(
                    "No snapshot at {}, starting cold",
                    self.path.display()
                );
                Snapshot::empty()
            }
            Err(e) => {
                log::error!(
                    "Snapshot at {} is unreadable ({}), starting cold",
                    self.path.display(),
                    e
                );
                Snapshot::empty()
            }
        }
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let location = self.location();
        let bytes = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| AppError::persistence(&location, e))?;
        self.write_bytes(&bytes)
            .await
            .map_err(|e| AppError::persistence(&location, e))?;

        log::debug!("Snapshot with {} listings written to {}", snapshot.len(), location);
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Listing, Price};
    use crate::pipeline::calculate_diff;
    use tempfile::TempDir;

    fn sample_snapshot() -> Snapshot {
        let listings = vec![
            Listing::new("https://shop.test/p/1", "Lamp").with_price(Price::Amount(25.0)),
            Listing::new("https://shop.test/p/2", "Chair")
                .with_id("SKU-2")
                .with_price(Price::Text("Call".into())),
        ];
        calculate_diff(&Snapshot::empty(), &listings).snapshot
    }

    #[tokio::test]
    async fn test_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = LocalSnapshotStore::new(tmp.path().join("state/listings.json"));
        let snapshot = sample_snapshot();

        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await, snapshot);
    }

    #[tokio::test]
    async fn test_missing_file_is_cold() {
        let tmp = TempDir::new().unwrap();
        let store = LocalSnapshotStore::new(tmp.path().join("nope.json"));

        let snapshot = store.load().await;
        assert!(snapshot.is_cold());
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_cold() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("listings.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = LocalSnapshotStore::new(&path);

        assert!(store.try_load().await.is_err());
        assert!(store.load().await.is_cold());
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let store = LocalSnapshotStore::new(tmp.path().join("listings.json"));

        store.save(&sample_snapshot()).await.unwrap();
        assert!(store.path().exists());
        assert!(!store.tmp_path().exists());
    }

    #[tokio::test]
    async fn test_save_replaces_previous() {
        let tmp = TempDir::new().unwrap();
        let store = LocalSnapshotStore::new(tmp.path().join("listings.json"));

        store.save(&sample_snapshot()).await.unwrap();
        let smaller = calculate_diff(&Snapshot::empty(), &[Listing::new("https://shop.test/p/9", "Desk")]).snapshot;
        store.save(&smaller).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("https://shop.test/p/9"));
    }

    #[tokio::test]
    async fn test_save_failure_is_persistence_error() {
        let tmp = TempDir::new().unwrap();
        // Parent is a regular file, so the directory cannot be created
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let store = LocalSnapshotStore::new(blocker.join("listings.json"));

        let result = store.save(&sample_snapshot()).await;
        assert!(matches!(result, Err(AppError::Persistence { .. })));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_failed_write_removes_temp_file() {
        let tmp = TempDir::new().unwrap();
        let store = LocalSnapshotStore::new(tmp.path().join("listings.json"));
        // Every write to /dev/full fails with ENOSPC
        std::os::unix::fs::symlink("/dev/full", store.tmp_path()).unwrap();

        let err = store.save(&sample_snapshot()).await.unwrap_err();
        assert!(matches!(err, AppError::Persistence { .. }));
        assert!(std::fs::symlink_metadata(store.tmp_path()).is_err());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_clear() {
        let tmp = TempDir::new().unwrap();
        let store = LocalSnapshotStore::new(tmp.path().join("listings.json"));

        assert!(!store.clear().await.unwrap());
        store.save(&sample_snapshot()).await.unwrap();
        assert!(store.clear().await.unwrap());
        assert!(store.load().await.is_cold());
    }

    #[test]
    fn test_tmp_path_is_sibling() {
        let store = LocalSnapshotStore::new("/data/previous_listings.json");
        assert_eq!(
            store.tmp_path(),
            PathBuf::from("/data/previous_listings.json.tmp")
        );
    }
}
