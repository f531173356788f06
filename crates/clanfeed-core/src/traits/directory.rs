// # Channel Directory Trait
//
// Answers the two questions the dispatcher must settle before calling a
// transport: does the channel still exist in a guild this process manages,
// and may we post there?
//
// It also defines which guilds this process manages (shard awareness): the
// registry and the scheduler only look at logs of those guilds.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::{ChannelId, GuildId, Permission};

/// Resolved channel and the permissions this process holds in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub guild_id: GuildId,
    pub permissions: Vec<Permission>,
}

impl ChannelInfo {
    pub fn new(guild_id: GuildId, permissions: Vec<Permission>) -> Self {
        Self {
            guild_id,
            permissions,
        }
    }

    /// Required permissions missing from this channel
    pub fn missing(&self, required: &[Permission]) -> Vec<Permission> {
        required
            .iter()
            .filter(|p| !self.permissions.contains(p))
            .copied()
            .collect()
    }
}

/// Trait for channel directory implementations
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    /// Guilds handled by this process
    async fn managed_guilds(&self) -> Vec<GuildId>;

    /// Resolve a channel (or a thread within it), `None` if it is gone
    async fn resolve(&self, channel_id: ChannelId, thread_id: Option<ChannelId>)
    -> Option<ChannelInfo>;
}

/// Directory backed by an explicit table
///
/// In permissive mode any channel resolves with every permission as long as
/// the directory manages at least one guild; this suits deployments that only
/// deliver through webhooks and never see the gateway's channel cache.
#[derive(Debug, Default)]
pub struct StaticChannelDirectory {
    guilds: RwLock<HashSet<GuildId>>,
    channels: RwLock<HashMap<ChannelId, ChannelInfo>>,
    permissive: bool,
}

impl StaticChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory resolving every channel with every permission
    pub fn permissive(guilds: impl IntoIterator<Item = GuildId>) -> Self {
        Self {
            guilds: RwLock::new(guilds.into_iter().collect()),
            channels: RwLock::new(HashMap::new()),
            permissive: true,
        }
    }

    pub fn add_guild(&self, guild_id: GuildId) {
        self.guilds_mut().insert(guild_id);
    }

    pub fn remove_guild(&self, guild_id: GuildId) {
        self.guilds_mut().remove(&guild_id);
    }

    /// Register a channel, also marking its guild as managed
    pub fn add_channel(&self, channel_id: ChannelId, info: ChannelInfo) {
        self.add_guild(info.guild_id);
        self.channels_mut().insert(channel_id, info);
    }

    pub fn remove_channel(&self, channel_id: ChannelId) {
        self.channels_mut().remove(&channel_id);
    }

    fn guilds(&self) -> RwLockReadGuard<'_, HashSet<GuildId>> {
        self.guilds.read().unwrap_or_else(|e| e.into_inner())
    }

    fn guilds_mut(&self) -> RwLockWriteGuard<'_, HashSet<GuildId>> {
        self.guilds.write().unwrap_or_else(|e| e.into_inner())
    }

    fn channels(&self) -> RwLockReadGuard<'_, HashMap<ChannelId, ChannelInfo>> {
        self.channels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn channels_mut(&self) -> RwLockWriteGuard<'_, HashMap<ChannelId, ChannelInfo>> {
        self.channels.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChannelDirectory for StaticChannelDirectory {
    async fn managed_guilds(&self) -> Vec<GuildId> {
        let mut guilds: Vec<GuildId> = self.guilds().iter().copied().collect();
        guilds.sort();
        guilds
    }

    async fn resolve(
        &self,
        channel_id: ChannelId,
        _thread_id: Option<ChannelId>,
    ) -> Option<ChannelInfo> {
        let known = self.channels().get(&channel_id).cloned();
        if known.is_some() || !self.permissive {
            return known;
        }

        let guild = self.guilds().iter().min().copied()?;
        Some(ChannelInfo::new(guild, Permission::ALL.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory_resolution() {
        let directory = StaticChannelDirectory::new();
        directory.add_channel(
            ChannelId(20),
            ChannelInfo::new(GuildId(10), vec![Permission::ViewChannel]),
        );

        assert_eq!(directory.managed_guilds().await, vec![GuildId(10)]);
        assert!(directory.resolve(ChannelId(20), None).await.is_some());
        assert!(directory.resolve(ChannelId(21), None).await.is_none());

        directory.remove_channel(ChannelId(20));
        assert!(directory.resolve(ChannelId(20), None).await.is_none());
    }

    #[tokio::test]
    async fn test_writes_survive_a_poisoned_lock() {
        let directory = std::sync::Arc::new(StaticChannelDirectory::new());
        let poisoner = std::sync::Arc::clone(&directory);
        let result = std::thread::spawn(move || {
            let _guilds = poisoner.guilds.write().unwrap();
            let _channels = poisoner.channels.write().unwrap();
            panic!("writer died holding the locks");
        })
        .join();
        assert!(result.is_err());
        assert!(directory.guilds.is_poisoned());

        directory.add_channel(
            ChannelId(20),
            ChannelInfo::new(GuildId(10), vec![Permission::ViewChannel]),
        );
        assert_eq!(directory.managed_guilds().await, vec![GuildId(10)]);
        assert!(directory.resolve(ChannelId(20), None).await.is_some());

        directory.remove_guild(GuildId(10));
        assert!(directory.managed_guilds().await.is_empty());
    }

    #[tokio::test]
    async fn test_permissive_directory_grants_everything() {
        let directory = StaticChannelDirectory::permissive([GuildId(1)]);
        let info = directory.resolve(ChannelId(99), None).await.unwrap();
        assert!(info.missing(&Permission::ALL).is_empty());
    }

    #[test]
    fn test_missing_permissions() {
        let info = ChannelInfo::new(GuildId(1), vec![Permission::ViewChannel]);
        assert_eq!(
            info.missing(&[Permission::ViewChannel, Permission::EmbedLinks]),
            vec![Permission::EmbedLinks]
        );
    }
}
