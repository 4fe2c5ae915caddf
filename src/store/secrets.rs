//! Secret store collaborator.
//!
//! Secrets are keyed by alias; broker configs only carry the alias. At-rest
//! encryption is a platform concern outside this crate.

use crate::store::repo::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn save(&self, alias: &str, secret: &str) -> Result<(), StoreError>;
    async fn get(&self, alias: &str) -> Result<Option<String>, StoreError>;
    async fn clear(&self, alias: &str) -> Result<(), StoreError>;
}

/// JSON-file-backed secret store.
pub struct FileSecretStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    fn load(&self) -> Result<HashMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn persist(&self, secrets: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec(secrets)?)?;
        Ok(())
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn save(&self, alias: &str, secret: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut secrets = self.load()?;
        secrets.insert(alias.to_string(), secret.to_string());
        self.persist(&secrets)
    }

    async fn get(&self, alias: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load()?.remove(alias))
    }

    async fn clear(&self, alias: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut secrets = self.load()?;
        if secrets.remove(alias).is_some() {
            self.persist(&secrets)?;
        }
        Ok(())
    }
}

/// In-memory secret store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn save(&self, alias: &str, secret: &str) -> Result<(), StoreError> {
        self.secrets
            .lock()
            .insert(alias.to_string(), secret.to_string());
        Ok(())
    }

    async fn get(&self, alias: &str) -> Result<Option<String>, StoreError> {
        Ok(self.secrets.lock().get(alias).cloned())
    }

    async fn clear(&self, alias: &str) -> Result<(), StoreError> {
        self.secrets.lock().remove(alias);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("secrets.json"));

        assert!(store.get("missing").await.unwrap().is_none());
        store.save("broker-1", "hunter2").await.unwrap();
        assert_eq!(store.get("broker-1").await.unwrap().as_deref(), Some("hunter2"));
        store.clear("broker-1").await.unwrap();
        assert!(store.get("broker-1").await.unwrap().is_none());
    }
}
