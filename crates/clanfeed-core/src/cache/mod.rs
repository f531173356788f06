//! In-memory cache of live logs
//!
//! The [`LogRegistry`] holds every enabled log of the guilds this process
//! manages, so an upstream event never costs a store round-trip. The store
//! stays the source of truth across restarts; the cache is authoritative
//! while the process runs.
//!
//! ## Consistency
//!
//! Message and retry state is written in two steps: the cache entry is
//! mutated first, then the store is written best-effort. A store failure is
//! logged and the cache keeps the newer state until the next [`LogRegistry::init`].
//!
//! ```text
//!   init()/add() ──► Store ──► cache
//!   record_*()   ──► cache ──► Store (best-effort)
//!   disable()    ──► evict ──► Store isEnabled=false, retries=0
//!   enable()     ──► Store isEnabled=true, retries=0 ──► cache
//! ```

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{GuildId, LogConfig, LogId, LogType, MessageId, RouteKey, normalize_tag};
use crate::traits::{ChannelDirectory, DeliveryState, LogFilter, LogStore};

/// A cached log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub config: LogConfig,
    /// Set on entries handed back by an eviction
    pub deleted: bool,
}

impl CacheEntry {
    fn live(config: LogConfig) -> Self {
        Self {
            config,
            deleted: false,
        }
    }

    pub fn id(&self) -> &LogId {
        &self.config.id
    }
}

/// Set of logs loaded by [`LogRegistry::add`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every enabled log of a guild
    Guild(GuildId),
    /// Every enabled log tracking one entity in a guild
    Entity { guild_id: GuildId, entity_tag: String },
    /// One log
    Log(LogId),
}

impl Scope {
    pub fn entity(guild_id: GuildId, entity_tag: &str) -> Self {
        Scope::Entity {
            guild_id,
            entity_tag: normalize_tag(entity_tag),
        }
    }

    fn contains(&self, config: &LogConfig) -> bool {
        match self {
            Scope::Guild(guild_id) => config.guild_id == *guild_id,
            Scope::Entity {
                guild_id,
                entity_tag,
            } => config.guild_id == *guild_id && &config.entity_tag == entity_tag,
            Scope::Log(id) => &config.id == id,
        }
    }
}

/// Cache of live logs, read-through and write-through against a [`LogStore`]
///
/// Shared as `Arc<LogRegistry>` between the dispatcher, the schedulers and
/// the command layer.
pub struct LogRegistry {
    store: Arc<dyn LogStore>,
    directory: Arc<dyn ChannelDirectory>,
    entries: DashMap<LogId, CacheEntry>,
    /// entity tag -> ids of the cached logs tracking it
    by_entity: DashMap<String, HashSet<LogId>>,
}

impl LogRegistry {
    pub fn new(store: Arc<dyn LogStore>, directory: Arc<dyn ChannelDirectory>) -> Self {
        Self {
            store,
            directory,
            entries: DashMap::new(),
            by_entity: DashMap::new(),
        }
    }

    /// The backing store
    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// Replace the cache with every enabled log of `types` in the managed guilds
    ///
    /// Returns the number of cached logs.
    pub async fn init(&self, types: &[LogType]) -> Result<usize> {
        let guilds = self.directory.managed_guilds().await;
        let filter = LogFilter::enabled()
            .in_guilds(guilds.clone())
            .with_log_types(types.to_vec());
        let logs = self.store.find(&filter).await?;

        self.entries.clear();
        self.by_entity.clear();
        for log in logs {
            self.insert(log);
        }

        info!(
            logs = self.entries.len(),
            guilds = guilds.len(),
            "Log cache initialized"
        );
        Ok(self.entries.len())
    }

    /// Load the logs of one newly enabled scope, leaving other entries untouched
    ///
    /// Cached entries inside the scope that are no longer enabled in the
    /// store are evicted. Scopes outside the managed guilds load nothing.
    pub async fn add(&self, scope: &Scope) -> Result<usize> {
        let managed = self.directory.managed_guilds().await;

        let logs: Vec<LogConfig> = match scope {
            Scope::Log(id) => self
                .store
                .get(id)
                .await?
                .filter(|log| log.is_enabled && managed.contains(&log.guild_id))
                .into_iter()
                .collect(),
            Scope::Guild(guild_id) | Scope::Entity { guild_id, .. } => {
                if !managed.contains(guild_id) {
                    debug!(guild = %guild_id, "Guild not managed by this process, nothing to load");
                    return Ok(0);
                }
                let mut filter = LogFilter::enabled().in_guilds(vec![*guild_id]);
                if let Scope::Entity { entity_tag, .. } = scope {
                    filter = filter.for_entity(entity_tag.clone());
                }
                self.store.find(&filter).await?
            }
        };

        let loaded: HashSet<LogId> = logs.iter().map(|log| log.id.clone()).collect();
        let stale: Vec<LogId> = self
            .entries
            .iter()
            .filter(|entry| scope.contains(&entry.config) && !loaded.contains(entry.id()))
            .map(|entry| entry.id().clone())
            .collect();
        for id in stale {
            self.delete(&id);
        }

        let count = logs.len();
        for log in logs {
            self.insert(log);
        }
        debug!(?scope, logs = count, "Loaded logs into cache");
        Ok(count)
    }

    /// Get a cached log
    pub fn get(&self, id: &LogId) -> Option<CacheEntry> {
        self.entries.get(id).map(|entry| entry.clone())
    }

    /// Evict a log from the cache, leaving the store untouched
    pub fn delete(&self, id: &LogId) -> Option<CacheEntry> {
        let (_, mut entry) = self.entries.remove(id)?;
        self.unindex(&entry.config.entity_tag, id);
        entry.deleted = true;
        Some(entry)
    }

    /// Register a new log or replace the one with the same guild, entity and type
    ///
    /// An invalid delivery target is rejected before anything is written.
    pub async fn register(&self, mut config: LogConfig) -> Result<LogConfig> {
        config.delivery_target.validate()?;
        config.entity_tag = normalize_tag(&config.entity_tag);

        let stored = self.store.upsert(config).await?;
        // A replaced record may have changed entity; drop the old index entry first
        self.delete(&stored.id);
        if stored.is_enabled {
            self.insert(stored.clone());
        }
        info!(log = %stored.id, log_type = %stored.log_type, entity = %stored.entity_tag, "Registered log");
        Ok(stored)
    }

    /// Evict a log and mark it disabled in the store
    ///
    /// The failure count is reset so a later [`enable`](Self::enable) starts
    /// with the full retry budget.
    pub async fn disable(&self, id: &LogId) -> Result<()> {
        let evicted = self.delete(id).map(|entry| entry.config);
        let config = match evicted {
            Some(config) => Some(config),
            None => self.store.get(id).await?,
        };
        let Some(mut config) = config else {
            debug!(log = %id, "Disabled log is not in the store");
            return Ok(());
        };

        config.retries = 0;
        self.persist(&config).await;
        self.set_enabled(id, false).await
    }

    /// Mark a log enabled in the store and load it into the cache
    ///
    /// Returns the number of cached logs loaded, zero when the log is outside
    /// the managed guilds.
    pub async fn enable(&self, id: &LogId) -> Result<usize> {
        let mut config = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Log {}", id)))?;
        if config.retries != 0 {
            config.retries = 0;
            self.persist(&config).await;
        }
        self.set_enabled(id, true).await?;

        let loaded = self.add(&Scope::Log(id.clone())).await?;
        info!(log = %id, loaded, "Enabled log");
        Ok(loaded)
    }

    /// Cached logs addressed by a route key
    pub fn matching(&self, key: &RouteKey) -> Vec<CacheEntry> {
        match key {
            RouteKey::Log(id) => self.get(id).into_iter().collect(),
            RouteKey::Entity(tag) => {
                let ids: Vec<LogId> = self
                    .by_entity
                    .get(tag)
                    .map(|ids| ids.iter().cloned().collect())
                    .unwrap_or_default();
                let mut entries: Vec<CacheEntry> =
                    ids.iter().filter_map(|id| self.get(id)).collect();
                entries.sort_by(|a, b| a.config.id.cmp(&b.config.id));
                entries
            }
        }
    }

    /// Record a successful delivery: message id, post time, retries reset
    ///
    /// Returns the updated config, or `None` if the log left the cache
    /// while the delivery was in flight.
    pub async fn record_success(
        &self,
        id: &LogId,
        message_id: MessageId,
        posted_at: DateTime<Utc>,
    ) -> Option<LogConfig> {
        let updated = self.update(id, |config| {
            config.message_id = Some(message_id);
            config.last_posted_at = posted_at;
            config.retries = 0;
        })?;
        self.persist(&updated).await;
        Some(updated)
    }

    /// Record a transient failure, returning the new consecutive failure count
    pub async fn record_failure(&self, id: &LogId) -> Option<u32> {
        let updated = self.update(id, |config| {
            config.retries = config.retries.saturating_add(1);
        })?;
        self.persist(&updated).await;
        Some(updated.retries)
    }

    /// Forget the message being edited so the next delivery sends a new one
    pub async fn clear_message(&self, id: &LogId) -> Option<LogConfig> {
        let updated = self.update(id, |config| config.message_id = None)?;
        self.persist(&updated).await;
        Some(updated)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached entry and flush the store
    pub async fn shutdown(&self) -> Result<()> {
        let count = self.entries.len();
        self.entries.clear();
        self.by_entity.clear();
        self.store.flush().await?;
        info!(logs = count, "Log cache shut down");
        Ok(())
    }

    fn insert(&self, config: LogConfig) {
        let id = config.id.clone();
        let tag = config.entity_tag.clone();
        if let Some(previous) = self.entries.insert(id.clone(), CacheEntry::live(config))
            && previous.config.entity_tag != tag
        {
            self.unindex(&previous.config.entity_tag, &id);
        }
        self.by_entity.entry(tag).or_default().insert(id);
    }

    fn unindex(&self, tag: &str, id: &LogId) {
        self.by_entity.remove_if_mut(tag, |_, ids| {
            ids.remove(id);
            ids.is_empty()
        });
    }

    /// Mutate a cached entry in place; the shard lock is released on return
    fn update(&self, id: &LogId, f: impl FnOnce(&mut LogConfig)) -> Option<LogConfig> {
        let mut entry = self.entries.get_mut(id)?;
        f(&mut entry.config);
        Some(entry.config.clone())
    }

    async fn set_enabled(&self, id: &LogId, enabled: bool) -> Result<()> {
        match self.store.set_enabled(id, enabled).await {
            Ok(()) => Ok(()),
            Err(Error::NotFound(_)) => {
                debug!(log = %id, enabled, "Log is not in the store");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, config: &LogConfig) {
        if let Err(e) = self
            .store
            .update_delivery(&config.id, &DeliveryState::of(config))
            .await
        {
            warn!(log = %config.id, "Failed to persist delivery state, cache stays authoritative: {}", e);
        }
    }
}
