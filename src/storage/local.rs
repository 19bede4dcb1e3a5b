//! Local filesystem state store.
//!
//! Writes go to a sibling temp file which is then renamed over the target,
//! so a concurrent reader sees either the old or the new document. There is
//! no lock: two overlapping runs can still race on the final rename.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{DetectorKind, PersistedState};
use crate::storage::StateStore;

/// State store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    path: PathBuf,
    kind: DetectorKind,
}

impl LocalStateStore {
    /// Create a store for `path`; `kind` decides how legacy shapes are upgraded.
    pub fn new(path: impl Into<PathBuf>, kind: DetectorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
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

        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
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
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> PersistedState {
        let bytes = match self.read_bytes().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                log::info!(
                    "No state file at {}, starting fresh",
                    self.path.display()
                );
                return PersistedState::default();
            }
            Err(e) => {
                log::warn!(
                    "State file {} unreadable, starting fresh: {}",
                    self.path.display(),
                    e
                );
                return PersistedState::default();
            }
        };

        match PersistedState::from_json(&bytes, self.kind) {
            Ok((state, upgraded)) => {
                if upgraded {
                    log::info!(
                        "Converted legacy state layout in {}",
                        self.path.display()
                    );
                }
                log::debug!("Loaded state for {} entities", state.entity_count());
                state
            }
            Err(e) => {
                log::warn!(
                    "State file {} is corrupt, starting fresh: {}",
                    self.path.display(),
                    e
                );
                PersistedState::default()
            }
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        self.write_bytes(&bytes).await?;
        log::debug!(
            "State for {} entities written to {}",
            state.entity_count(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_state() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStateStore::new(tmp.path().join("state.json"), DetectorKind::SeenSet);

        assert_eq!(store.load().await, PersistedState::default());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty_state() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, b"{\"seen\": [trunc").unwrap();
        let store = LocalStateStore::new(&path, DetectorKind::SeenSet);

        assert_eq!(store.load().await, PersistedState::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStateStore::new(tmp.path().join("nested/state.json"), DetectorKind::SeenSet);

        let mut state = PersistedState::default();
        state
            .seen
            .insert("42".into(), vec!["a".into(), "b".into()]);
        store.save(&state).await.unwrap();

        assert_eq!(store.load().await, state);
        assert!(!tmp.path().join("nested/state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_overwrites_whole_record() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStateStore::new(tmp.path().join("state.json"), DetectorKind::LatestId);

        let mut first = PersistedState::default();
        first.latest.insert("1".into(), "old".into());
        first.latest.insert("2".into(), "gone".into());
        store.save(&first).await.unwrap();

        let mut second = PersistedState::default();
        second.latest.insert("1".into(), "new".into());
        store.save(&second).await.unwrap();

        assert_eq!(store.load().await, second);
    }

    #[tokio::test]
    async fn test_legacy_seen_file_loads_as_latest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, br#"{"seen": {"42": ["x", "y"]}}"#).unwrap();
        let store = LocalStateStore::new(&path, DetectorKind::LatestId);

        let state = store.load().await;
        assert_eq!(state.latest["42"], "y");
        assert!(state.seen.is_empty());
    }
}
