// # File Log Store
//
// File-based implementation of LogStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "logs": {
//     "1": {
//       "id": "1",
//       "guildId": 10,
//       "entityTag": "#2PP",
//       "logType": "legend_digest",
//       "channelId": 20,
//       "deliveryTarget": { "webhookId": 30, "token": "..." },
//       "messageId": "1188",
//       "lastPostedAt": "2025-01-09T12:00:00Z",
//       "retries": 0,
//       "isEnabled": true
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::StoreConfig;
use crate::model::{LogConfig, LogId};
use crate::traits::log_store::{DeliveryState, LogFilter, LogStore, LogStoreFactory};

/// Store file format version
const STORE_FILE_VERSION: &str = "1.0";

/// File-based log store with crash recovery
///
/// Every mutation is written through to disk before returning.
#[derive(Debug)]
pub struct FileLogStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    logs: HashMap<LogId, LogConfig>,
    dirty: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    logs: HashMap<LogId, LogConfig>,
}

/// Why a store file could not be loaded
enum LoadError {
    /// The file exists but does not parse
    Corrupt(Error),
    /// The file could not be read at all
    Io(Error),
}

impl FileLogStore {
    /// Create or load a file log store
    ///
    /// This will:
    /// 1. Try to load the existing store file
    /// 2. If it is corrupted, try to load the backup
    /// 3. If both fail, start empty
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let logs = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState { logs, dirty: false })),
        })
    }

    async fn load_with_recovery(path: &Path) -> Result<HashMap<LogId, LogConfig>, Error> {
        match Self::load(path).await {
            Ok(logs) => {
                tracing::debug!(logs = logs.len(), "Loaded log store from {}", path.display());
                Ok(logs)
            }
            Err(LoadError::Io(e)) => Err(e),
            Err(LoadError::Corrupt(e)) => {
                tracing::warn!("Store file appears corrupted: {}. Attempting recovery from backup.", e);

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with an empty store.");
                    return Ok(HashMap::new());
                }

                match Self::load(&backup_path).await {
                    Ok(logs) => {
                        tracing::info!(logs = logs.len(), "Recovered log store from backup");
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!("Failed to restore store file from backup: {}", restore_err);
                        }
                        Ok(logs)
                    }
                    Err(LoadError::Corrupt(backup_err)) | Err(LoadError::Io(backup_err)) => {
                        tracing::error!(
                            "Backup also unreadable: {}. Starting with an empty store.",
                            backup_err
                        );
                        Ok(HashMap::new())
                    }
                }
            }
        }
    }

    async fn load(path: &Path) -> Result<HashMap<LogId, LogConfig>, LoadError> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadError::Io(Error::store(format!(
                "Failed to read store file {}: {}",
                path.display(),
                e
            )))
        })?;

        let file: StoreFileFormat = serde_json::from_str(&content).map_err(|e| {
            LoadError::Corrupt(Error::store(format!(
                "Failed to parse store file {}: {}",
                path.display(),
                e
            )))
        })?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.logs)
    }

    /// Write the whole store atomically (temp file, backup, rename)
    async fn write(&self) -> Result<(), Error> {
        let mut state = self.state.write().await;

        let file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            logs: state.logs.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::store(format!("Failed to serialize store: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.flush().await.map_err(|e| {
                Error::store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists()
            && let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await
        {
            tracing::warn!("Failed to create backup: {}", e);
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        state.dirty = false;
        tracing::trace!("Log store written to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    /// Apply a mutation to one stored log and write through
    async fn mutate(&self, id: &LogId, f: impl FnOnce(&mut LogConfig)) -> Result<(), Error> {
        {
            let mut state = self.state.write().await;
            let log = state
                .logs
                .get_mut(id)
                .ok_or_else(|| Error::not_found(format!("Log {}", id)))?;
            f(log);
            state.dirty = true;
        }
        self.write().await
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn find(&self, filter: &LogFilter) -> Result<Vec<LogConfig>, Error> {
        let state = self.state.read().await;
        let mut logs: Vec<LogConfig> = state
            .logs
            .values()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect();
        logs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(logs)
    }

    async fn get(&self, id: &LogId) -> Result<Option<LogConfig>, Error> {
        Ok(self.state.read().await.logs.get(id).cloned())
    }

    async fn upsert(&self, config: LogConfig) -> Result<LogConfig, Error> {
        let stored = {
            let mut state = self.state.write().await;
            let stored = super::upsert_into(&mut state.logs, config);
            state.dirty = true;
            stored
        };
        self.write().await?;
        Ok(stored)
    }

    async fn update_delivery(&self, id: &LogId, delivery: &DeliveryState) -> Result<(), Error> {
        self.mutate(id, |log| delivery.apply_to(log)).await
    }

    async fn set_enabled(&self, id: &LogId, enabled: bool) -> Result<(), Error> {
        self.mutate(id, |log| log.is_enabled = enabled).await
    }

    async fn delete(&self, id: &LogId) -> Result<(), Error> {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state.logs.remove(id).is_some();
            state.dirty |= removed;
            removed
        };
        if removed {
            self.write().await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        let dirty = self.state.read().await.dirty;
        if dirty { self.write().await } else { Ok(()) }
    }
}

/// Factory for file stores
pub struct FileLogStoreFactory;

#[async_trait]
impl LogStoreFactory for FileLogStoreFactory {
    async fn create(&self, config: &StoreConfig) -> Result<Box<dyn LogStore>, Error> {
        match config {
            StoreConfig::File { path } => Ok(Box::new(FileLogStore::new(path).await?)),
            _ => Err(Error::config("Invalid config for file store")),
        }
    }
}
