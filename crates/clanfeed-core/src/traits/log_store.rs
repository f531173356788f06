// # Log Store Trait
//
// Defines the interface for the persistent source of truth of registered logs.
//
// ## Purpose
//
// The store holds one `LogConfig` per (guild, entity, log type). It is read
// in bulk by `LogRegistry::init()`, incrementally by `LogRegistry::add()`,
// queried by due time by the `Scheduler`, and written best-effort after each
// dispatch outcome.
//
// ## Implementations
//
// - `MemoryLogStore`: in-process, not persistent
// - `FileLogStore`: JSON file with atomic writes and backup recovery
//
// ## Usage
//
// ```rust,ignore
// use clanfeed_core::traits::{LogFilter, LogStore};
//
// let due = store
//     .find(&LogFilter::enabled().with_log_type(LogType::LegendDigest).posted_before(cutoff))
//     .await?;
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{GuildId, LogConfig, LogId, LogType, MessageId};

/// Message and retry state written after each dispatch outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryState {
    pub message_id: Option<MessageId>,
    pub last_posted_at: DateTime<Utc>,
    pub retries: u32,
}

impl DeliveryState {
    pub fn of(config: &LogConfig) -> Self {
        Self {
            message_id: config.message_id.clone(),
            last_posted_at: config.last_posted_at,
            retries: config.retries,
        }
    }

    pub fn apply_to(&self, config: &mut LogConfig) {
        config.message_id = self.message_id.clone();
        config.last_posted_at = self.last_posted_at;
        config.retries = self.retries;
    }
}

/// Query over stored logs; every `None` field matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub guild_ids: Option<Vec<GuildId>>,
    pub log_types: Option<Vec<LogType>>,
    pub entity_tag: Option<String>,
    pub enabled: Option<bool>,
    /// Only logs whose `last_posted_at` is strictly older than this
    pub posted_before: Option<DateTime<Utc>>,
}

impl LogFilter {
    /// Filter matching enabled logs only
    pub fn enabled() -> Self {
        Self {
            enabled: Some(true),
            ..Self::default()
        }
    }

    pub fn in_guilds(mut self, guild_ids: Vec<GuildId>) -> Self {
        self.guild_ids = Some(guild_ids);
        self
    }

    pub fn with_log_type(mut self, log_type: LogType) -> Self {
        self.log_types = Some(vec![log_type]);
        self
    }

    pub fn with_log_types(mut self, log_types: Vec<LogType>) -> Self {
        self.log_types = Some(log_types);
        self
    }

    pub fn for_entity(mut self, entity_tag: impl Into<String>) -> Self {
        self.entity_tag = Some(entity_tag.into());
        self
    }

    pub fn posted_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.posted_before = Some(cutoff);
        self
    }

    /// Whether `config` satisfies every set criterion
    pub fn matches(&self, config: &LogConfig) -> bool {
        if let Some(guilds) = &self.guild_ids
            && !guilds.contains(&config.guild_id)
        {
            return false;
        }
        if let Some(types) = &self.log_types
            && !types.contains(&config.log_type)
        {
            return false;
        }
        if let Some(tag) = &self.entity_tag
            && tag != &config.entity_tag
        {
            return false;
        }
        if let Some(enabled) = self.enabled
            && enabled != config.is_enabled
        {
            return false;
        }
        if let Some(cutoff) = self.posted_before
            && config.last_posted_at >= cutoff
        {
            return false;
        }
        true
    }
}

/// Trait for log store implementations
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Invariant
///
/// At most one record exists per `(guild_id, entity_tag, log_type)`.
/// `upsert` of a config whose triple is already stored under another id
/// overwrites that record and keeps the stored id.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Find all logs matching the filter
    async fn find(&self, filter: &LogFilter) -> Result<Vec<LogConfig>, crate::Error>;

    /// Get one log by id
    async fn get(&self, id: &LogId) -> Result<Option<LogConfig>, crate::Error>;

    /// Insert or replace a log, returning the stored record
    async fn upsert(&self, config: LogConfig) -> Result<LogConfig, crate::Error>;

    /// Persist message/retry state after a dispatch outcome
    ///
    /// Returns `Error::NotFound` if the log does not exist.
    async fn update_delivery(&self, id: &LogId, state: &DeliveryState)
    -> Result<(), crate::Error>;

    /// Enable or disable a log
    ///
    /// Returns `Error::NotFound` if the log does not exist.
    async fn set_enabled(&self, id: &LogId, enabled: bool) -> Result<(), crate::Error>;

    /// Delete a log (no error if it does not exist)
    async fn delete(&self, id: &LogId) -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing log stores from configuration
#[async_trait]
pub trait LogStoreFactory: Send + Sync {
    async fn create(
        &self,
        config: &crate::config::StoreConfig,
    ) -> Result<Box<dyn LogStore>, crate::Error>;
}
