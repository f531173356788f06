// # Memory Log Store
//
// In-memory implementation of LogStore.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts.
// Useful for testing and for deployments where registrations are replayed
// by the command layer at startup.
//
// ## Crash Behavior
//
// - All registrations and message ids are lost on restart/crash
// - Digests start a new message after a restart

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::StoreConfig;
use crate::model::{LogConfig, LogId};
use crate::traits::log_store::{DeliveryState, LogFilter, LogStore, LogStoreFactory};

/// In-memory log store implementation
///
/// # Example
///
/// ```rust,no_run
/// use clanfeed_core::model::{ChannelId, DeliveryTarget, GuildId, LogConfig, LogType};
/// use clanfeed_core::store::MemoryLogStore;
/// use clanfeed_core::traits::LogStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryLogStore::new();
///     let log = LogConfig::new(
///         "1",
///         GuildId(10),
///         "#2PP",
///         LogType::MemberLog,
///         ChannelId(20),
///         DeliveryTarget::new(30, "token"),
///     );
///     store.upsert(log).await?;
///     assert!(store.get(&"1".into()).await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStore {
    inner: Arc<RwLock<HashMap<LogId, LogConfig>>>,
}

impl MemoryLogStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of logs in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Remove every log
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn find(&self, filter: &LogFilter) -> Result<Vec<LogConfig>, Error> {
        let guard = self.inner.read().await;
        let mut logs: Vec<LogConfig> = guard
            .values()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect();
        logs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(logs)
    }

    async fn get(&self, id: &LogId) -> Result<Option<LogConfig>, Error> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn upsert(&self, config: LogConfig) -> Result<LogConfig, Error> {
        let mut guard = self.inner.write().await;
        Ok(super::upsert_into(&mut guard, config))
    }

    async fn update_delivery(&self, id: &LogId, state: &DeliveryState) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let log = guard
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("Log {}", id)))?;
        state.apply_to(log);
        Ok(())
    }

    async fn set_enabled(&self, id: &LogId, enabled: bool) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        let log = guard
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("Log {}", id)))?;
        log.is_enabled = enabled;
        Ok(())
    }

    async fn delete(&self, id: &LogId) -> Result<(), Error> {
        self.inner.write().await.remove(id);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing buffered
        Ok(())
    }
}

/// Factory for memory stores
pub struct MemoryLogStoreFactory;

#[async_trait]
impl LogStoreFactory for MemoryLogStoreFactory {
    async fn create(&self, config: &StoreConfig) -> Result<Box<dyn LogStore>, Error> {
        match config {
            StoreConfig::Memory => Ok(Box::new(MemoryLogStore::new())),
            _ => Err(Error::config("Invalid config for memory store")),
        }
    }
}
