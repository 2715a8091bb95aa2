// Settings store
//
// The wizard answers live in one settings bag shared by every install step. Steps read and
// write through `SettingsStore`; the host decides where the bag lives (memory for tests and
// embedding, a JSON file for the CLI).

pub mod file_store;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

use crate::error::InstallError;
use crate::models::settings::{SettingsBag, KEY_INITIALIZED};

pub use file_store::FileSettingsStore;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Value at a dotted key (`gpg.fingerprint`), if any.
    async fn get(&self, key: &str) -> Option<Value>;

    async fn set(&self, key: &str, value: Value);

    async fn remove(&self, key: &str) -> Option<Value>;

    /// Copy of the whole bag, for steps that read a namespace at once.
    async fn snapshot(&self) -> SettingsBag;

    /// Make the current bag durable.
    async fn persist(&self) -> Result<(), InstallError>;

    /// Discard the bag, durable copy included.
    async fn clear(&self) -> Result<(), InstallError>;

    async fn is_initialized(&self) -> bool {
        matches!(self.get(KEY_INITIALIZED).await, Some(Value::Bool(true)))
    }
}

/// In-process store. `persist` only counts calls.
#[derive(Default)]
pub struct MemorySettingsStore {
    bag: Mutex<SettingsBag>,
    persisted: AtomicU32,
}

impl MemorySettingsStore {
    pub fn new(bag: SettingsBag) -> Self {
        Self {
            bag: Mutex::new(bag),
            persisted: AtomicU32::new(0),
        }
    }

    pub fn persist_count(&self) -> u32 {
        self.persisted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
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
        self.persisted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<(), InstallError> {
        *self.bag.lock().await = SettingsBag::new();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_reads_back_dotted_keys() {
        let store = MemorySettingsStore::default();
        store.set("gpg.fingerprint", json!("ABC")).await;
        assert_eq!(store.get("gpg").await, Some(json!({"fingerprint": "ABC"})));
        assert_eq!(store.get("gpg.fingerprint").await, Some(json!("ABC")));
        assert!(store.get("gpg.public").await.is_none());
    }

    #[tokio::test]
    async fn initialized_flag_and_clear() {
        let store = MemorySettingsStore::default();
        assert!(!store.is_initialized().await);
        store.set(KEY_INITIALIZED, json!(true)).await;
        assert!(store.is_initialized().await);

        store.clear().await.unwrap();
        assert!(!store.is_initialized().await);
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn persist_is_counted() {
        let store = MemorySettingsStore::default();
        store.persist().await.unwrap();
        store.persist().await.unwrap();
        assert_eq!(store.persist_count(), 2);
    }
}
