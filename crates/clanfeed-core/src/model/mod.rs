//! Domain model for registered logs
//!
//! This module defines the persisted [`LogConfig`] record, its identifiers,
//! the ephemeral [`Feed`] passed into a dispatch, and the [`RouteKey`] an
//! upstream caller uses to address logs.

mod payload;
mod period;

pub use payload::{Embed, EmbedField, EmbedFooter, MessagePayload};
pub use period::Period;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a registered log
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(pub String);

impl LogId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Chat-platform guild (server) snowflake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(pub u64);

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chat-platform channel or thread snowflake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a delivered message, assigned by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Log families known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    /// Member joined or left a clan (one message per event)
    MemberLog,
    /// Donations given and received (one message per batch)
    DonationLog,
    /// Legend league attacks and defenses, one message per legend day
    LegendDigest,
    /// Clan games points, one message per month
    ClanGamesDigest,
    /// Capital raid contributions, one message per month
    CapitalDigest,
    /// Member activity board, edited in place indefinitely
    LastSeenDigest,
}

impl LogType {
    /// Every log type, in declaration order
    pub const ALL: [LogType; 6] = [
        LogType::MemberLog,
        LogType::DonationLog,
        LogType::LegendDigest,
        LogType::ClanGamesDigest,
        LogType::CapitalDigest,
        LogType::LastSeenDigest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::MemberLog => "member_log",
            LogType::DonationLog => "donation_log",
            LogType::LegendDigest => "legend_digest",
            LogType::ClanGamesDigest => "clan_games_digest",
            LogType::CapitalDigest => "capital_digest",
            LogType::LastSeenDigest => "last_seen_digest",
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| crate::Error::invalid_input(format!("Unknown log type: {}", s)))
    }
}

/// Channel capabilities a log family may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewChannel,
    SendMessages,
    SendMessagesInThreads,
    EmbedLinks,
    AttachFiles,
    ReadMessageHistory,
    ManageWebhooks,
}

impl Permission {
    pub const ALL: [Permission; 7] = [
        Permission::ViewChannel,
        Permission::SendMessages,
        Permission::SendMessagesInThreads,
        Permission::EmbedLinks,
        Permission::AttachFiles,
        Permission::ReadMessageHistory,
        Permission::ManageWebhooks,
    ];
}

/// Destination endpoint and credential a message is delivered to
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTarget {
    /// Webhook snowflake
    pub webhook_id: u64,
    /// Webhook token
    /// ⚠️ NEVER log this value
    pub token: String,
}

impl fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryTarget")
            .field("webhook_id", &self.webhook_id)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

impl DeliveryTarget {
    pub fn new(webhook_id: u64, token: impl Into<String>) -> Self {
        Self {
            webhook_id,
            token: token.into(),
        }
    }

    /// Reject targets that can never be delivered to
    pub fn validate(&self) -> crate::Result<()> {
        if self.webhook_id == 0 {
            return Err(crate::Error::config("Delivery target webhook id cannot be 0"));
        }
        if self.token.is_empty() {
            return Err(crate::Error::config("Delivery target token cannot be empty"));
        }
        if self.token.len() > 256 {
            return Err(crate::Error::config(format!(
                "Delivery target token too long: {} chars (max 256)",
                self.token.len()
            )));
        }
        if !self
            .token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(crate::Error::config(
                "Delivery target token contains invalid characters",
            ));
        }
        Ok(())
    }
}

/// A registered log: one tracked entity bound to one delivery target in one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    pub id: LogId,
    pub guild_id: GuildId,
    #[serde(deserialize_with = "deserialize_tag")]
    pub entity_tag: String,
    pub log_type: LogType,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub thread_id: Option<ChannelId>,
    #[serde(default)]
    pub color: Option<u32>,
    pub delivery_target: DeliveryTarget,
    #[serde(default)]
    pub message_id: Option<MessageId>,
    #[serde(default = "never_posted")]
    pub last_posted_at: DateTime<Utc>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn never_posted() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn default_enabled() -> bool {
    true
}

impl LogConfig {
    /// Create a new, never-posted, enabled log
    pub fn new(
        id: impl Into<LogId>,
        guild_id: GuildId,
        entity_tag: &str,
        log_type: LogType,
        channel_id: ChannelId,
        delivery_target: DeliveryTarget,
    ) -> Self {
        Self {
            id: id.into(),
            guild_id,
            entity_tag: normalize_tag(entity_tag),
            log_type,
            channel_id,
            thread_id: None,
            color: None,
            delivery_target,
            message_id: None,
            last_posted_at: never_posted(),
            retries: 0,
            is_enabled: true,
        }
    }

    /// Deliver into a thread of the channel
    pub fn with_thread(mut self, thread_id: ChannelId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Set the embed accent color
    pub fn with_color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    /// Set the message currently being edited
    pub fn with_message(mut self, message_id: MessageId, posted_at: DateTime<Utc>) -> Self {
        self.message_id = Some(message_id);
        self.last_posted_at = posted_at;
        self
    }

    /// The triple a store keeps unique
    pub fn unique_key(&self) -> (GuildId, &str, LogType) {
        (self.guild_id, self.entity_tag.as_str(), self.log_type)
    }
}

impl From<String> for LogId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Normalize a game entity tag: uppercase, `#`-prefixed, `O` read as `0`
pub fn normalize_tag(tag: &str) -> String {
    let body: String = tag
        .trim()
        .trim_start_matches('#')
        .chars()
        .map(|c| match c.to_ascii_uppercase() {
            'O' => '0',
            other => other,
        })
        .collect();
    format!("#{}", body)
}

fn deserialize_tag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(normalize_tag(&raw))
}

/// Ephemeral payload describing a change or a current snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    /// The log family this feed was produced for
    pub log_type: LogType,
    /// Tracked entity the feed describes
    #[serde(deserialize_with = "deserialize_tag")]
    pub entity_tag: String,
    /// Family-specific body, interpreted by the family's renderer
    pub payload: serde_json::Value,
    /// When the change or snapshot was observed
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

impl Feed {
    pub fn new(log_type: LogType, entity_tag: &str, payload: serde_json::Value) -> Self {
        Self {
            log_type,
            entity_tag: normalize_tag(entity_tag),
            payload,
            observed_at: Utc::now(),
        }
    }
}

/// How an `exec` call addresses the logs it should update
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RouteKey {
    /// Every log tracking this entity (upstream events fan out across guilds)
    Entity(String),
    /// One specific log (scheduler refreshes)
    Log(LogId),
}

impl RouteKey {
    pub fn entity(tag: &str) -> Self {
        RouteKey::Entity(normalize_tag(tag))
    }

    pub fn log(id: impl Into<LogId>) -> Self {
        RouteKey::Log(id.into())
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKey::Entity(tag) => write!(f, "entity:{}", tag),
            RouteKey::Log(id) => write!(f, "log:{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("2pp"), "#2PP");
        assert_eq!(normalize_tag(" #2ooq "), "#200Q");
        assert_eq!(normalize_tag("#ABC"), "#ABC");
    }

    #[test]
    fn test_log_type_round_trip_through_str() {
        for log_type in LogType::ALL {
            assert_eq!(log_type.as_str().parse::<LogType>().unwrap(), log_type);
        }
        assert!("war_log".parse::<LogType>().is_err());
    }

    #[test]
    fn test_delivery_target_validation() {
        assert!(DeliveryTarget::new(42, "abc-DEF_123").validate().is_ok());
        assert!(DeliveryTarget::new(0, "abc").validate().unwrap_err().is_config());
        assert!(DeliveryTarget::new(42, "").validate().unwrap_err().is_config());
        assert!(DeliveryTarget::new(42, "has space").validate().is_err());
    }

    #[test]
    fn test_delivery_target_debug_redacts_token() {
        let target = DeliveryTarget::new(42, "super-secret");
        let debug = format!("{:?}", target);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_log_config_deserializes_with_defaults() {
        let json = serde_json::json!({
            "id": "1",
            "guildId": 10,
            "entityTag": "#2PP",
            "logType": "legend_digest",
            "channelId": 20,
            "deliveryTarget": { "webhookId": 30, "token": "tok" }
        });
        let config: LogConfig = serde_json::from_value(json).unwrap();
        assert!(config.is_enabled);
        assert_eq!(config.retries, 0);
        assert!(config.message_id.is_none());
        assert_eq!(config.last_posted_at, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_entity_tag_normalized_on_deserialize() {
        let json = serde_json::json!({
            "id": "1",
            "guildId": 10,
            "entityTag": "2ppo",
            "logType": "member_log",
            "channelId": 20,
            "deliveryTarget": { "webhookId": 30, "token": "tok" }
        });
        let config: LogConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.entity_tag, "#2PP0");
    }

    #[test]
    fn test_route_key_serde_shape() {
        let key: RouteKey =
            serde_json::from_value(serde_json::json!({"type": "entity", "value": "#2PP"}))
                .unwrap();
        assert_eq!(key, RouteKey::entity("2pp"));
    }
}
