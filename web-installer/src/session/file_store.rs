//! JSON-file settings store.
//!
//! The file holds one JSON object (the settings bag). It is read once on `load` and rewritten
//! whole on every `persist`, private to the installing user (0600) since it carries the database
//! password and key passphrase.

use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::SettingsStore;
use crate::error::InstallError;
use crate::installation::files::write_file_atomic;
use crate::models::settings::SettingsBag;

pub struct FileSettingsStore {
    path: PathBuf,
    bag: Mutex<SettingsBag>,
}

impl FileSettingsStore {
    /// Open the store at `path`. A missing file starts an empty bag.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, InstallError> {
        let path = path.into();
        let bag = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => SettingsBag::new(),
            Ok(content) => {
                let value: Value = serde_json::from_str(&content)
                    .map_err(|e| InstallError::settings("<file>", format!("{:?}: {}", path, e)))?;
                SettingsBag::from_value(value)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "[PHASE: session] [STEP: load] No settings file at {:?}; starting empty",
                    path
                );
                SettingsBag::new()
            }
            Err(e) => return Err(InstallError::io(&path, e)),
        };

        debug!(
            "[PHASE: session] [STEP: load] Settings loaded (path={:?}, empty={})",
            path,
            bag.is_empty()
        );
        Ok(Self {
            path,
            bag: Mutex::new(bag),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn get(&self, key: &str) -> Option<Value> {
        self.bag.lock().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: Value) {
        self.bag.lock().await.set(key, value);
    }

    async fn remove(&self, key: &str) -> Option<Value> {
        self.bag.lock().await.remove(key)
    }

    async fn snapshot(&self) -> SettingsBag {
        self.bag.lock().await.clone()
    }

    async fn persist(&self) -> Result<(), InstallError> {
        let bytes = {
            let bag = self.bag.lock().await;
            serde_json::to_vec_pretty(&*bag).map_err(|e| InstallError::io(&self.path, e))?
        };
        write_file_atomic(&self.path, &bytes, Some(0o600), "persist_settings")
            .await
            .map_err(|e| InstallError::io(&self.path, format!("{:#}", e)))
    }

    async fn clear(&self) -> Result<(), InstallError> {
        *self.bag.lock().await = SettingsBag::new();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(InstallError::io(&self.path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_file_starts_empty_and_persist_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session").join("webinstaller.json");

        let store = FileSettingsStore::load(&path).await.unwrap();
        assert!(store.snapshot().await.is_empty());

        store.set("database.host", json!("localhost")).await;
        store.persist().await.unwrap();

        let reloaded = FileSettingsStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get("database.host").await, Some(json!("localhost")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn persisted_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webinstaller.json");
        let store = FileSettingsStore::load(&path).await.unwrap();
        store.set("database.password", json!("secret")).await;
        store.persist().await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn malformed_file_is_a_settings_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webinstaller.json");
        tokio::fs::write(&path, b"[1, 2, 3]").await.unwrap();

        let err = FileSettingsStore::load(&path).await.err().unwrap();
        assert_eq!(err.code(), "SETTINGS_ERROR");
    }

    #[tokio::test]
    async fn clear_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webinstaller.json");
        let store = FileSettingsStore::load(&path).await.unwrap();
        store.set("initialized", json!(true)).await;
        store.persist().await.unwrap();
        assert!(store.is_initialized().await);

        store.clear().await.unwrap();
        assert!(!path.exists());
        assert!(!store.is_initialized().await);
        // Clearing twice is fine.
        store.clear().await.unwrap();
    }
}
