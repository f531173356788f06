//! Configuration types for the clanfeed engine
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::LogType;

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Log store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Snapshot source for pull-style families (none disables the schedulers)
    #[serde(default)]
    pub source: Option<SourceConfig>,

    /// Dispatch settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// One scheduler per pull-style log family
    #[serde(default)]
    pub schedulers: Vec<SchedulerConfig>,
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.store.validate()?;
        self.transport.validate()?;
        if let Some(source) = &self.source {
            source.validate()?;
        }
        self.dispatch.validate()?;

        for (i, scheduler) in self.schedulers.iter().enumerate() {
            scheduler.validate()?;
            if self.schedulers[..i]
                .iter()
                .any(|other| other.log_type == scheduler.log_type)
            {
                return Err(crate::Error::config(format!(
                    "Duplicate scheduler for log type {}",
                    scheduler.log_type
                )));
            }
        }

        if !self.schedulers.is_empty() && self.source.is_none() {
            return Err(crate::Error::config(
                "Schedulers are configured but no snapshot source is set",
            ));
        }

        Ok(())
    }
}

/// Log store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// JSON file store
    File {
        /// Path to the store file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("File store path cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Store type name
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::File { .. } => "file",
            StoreConfig::Memory => "memory",
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Webhook transport
    Webhook {
        /// API base URL
        #[serde(default = "default_webhook_api_base")]
        api_base: String,
        /// Per-request timeout in seconds
        #[serde(default = "default_transport_timeout_secs")]
        timeout_secs: u64,
        /// Log instead of delivering
        #[serde(default)]
        dry_run: bool,
    },
}

impl TransportConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            TransportConfig::Webhook {
                api_base,
                timeout_secs,
                ..
            } => {
                if !api_base.starts_with("https://") && !api_base.starts_with("http://") {
                    return Err(crate::Error::config(format!(
                        "Webhook API base must be an HTTP(S) URL. Got: {}",
                        api_base
                    )));
                }
                if *timeout_secs == 0 {
                    return Err(crate::Error::config("Transport timeout must be > 0"));
                }
                Ok(())
            }
        }
    }

    /// Transport type name
    pub fn type_name(&self) -> &str {
        match self {
            TransportConfig::Webhook { .. } => "webhook",
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Webhook {
            api_base: default_webhook_api_base(),
            timeout_secs: default_transport_timeout_secs(),
            dry_run: false,
        }
    }
}

/// Snapshot source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// HTTP JSON snapshots
    Http {
        /// Base URL, snapshots are fetched from `{base_url}/{collection}/{tag}`
        base_url: String,
        /// Bearer token
        #[serde(default)]
        token: Option<String>,
        /// Per-request timeout in seconds
        #[serde(default = "default_transport_timeout_secs")]
        timeout_secs: u64,
    },
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            SourceConfig::Http {
                base_url,
                timeout_secs,
                ..
            } => {
                if base_url.is_empty() {
                    return Err(crate::Error::config("Snapshot source URL cannot be empty"));
                }
                if *timeout_secs == 0 {
                    return Err(crate::Error::config("Snapshot source timeout must be > 0"));
                }
                Ok(())
            }
        }
    }
}

/// Dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Consecutive transient failures after which a log is disabled
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Capacity of the dispatch event channel
    ///
    /// When full, events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_retries == 0 {
            return Err(crate::Error::config("max_retries must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Scheduler settings for one pull-style log family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Log family driven by this scheduler
    pub log_type: LogType,

    /// A log is due once its last post is older than this
    #[serde(default = "default_refresh_window_secs")]
    pub refresh_window_secs: u64,

    /// Delay between the end of one tick and the start of the next
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Pause between two logs of the same tick
    #[serde(default = "default_inter_item_delay_millis")]
    pub inter_item_delay_millis: u64,

    /// Restrict ticking to a recurring window
    #[serde(default)]
    pub activation: Option<ActivationConfig>,
}

impl SchedulerConfig {
    pub fn new(log_type: LogType) -> Self {
        Self {
            log_type,
            refresh_window_secs: default_refresh_window_secs(),
            tick_interval_secs: default_tick_interval_secs(),
            inter_item_delay_millis: default_inter_item_delay_millis(),
            activation: None,
        }
    }

    pub fn with_refresh_window(mut self, window: Duration) -> Self {
        self.refresh_window_secs = window.as_secs();
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_secs = interval.as_secs();
        self
    }

    pub fn with_inter_item_delay(mut self, delay: Duration) -> Self {
        self.inter_item_delay_millis = delay.as_millis() as u64;
        self
    }

    pub fn with_activation(mut self, activation: ActivationConfig) -> Self {
        self.activation = Some(activation);
        self
    }

    pub fn refresh_window(&self) -> Duration {
        Duration::from_secs(self.refresh_window_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_millis)
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.refresh_window_secs == 0 {
            return Err(crate::Error::config(format!(
                "Scheduler for {}: refresh window must be > 0",
                self.log_type
            )));
        }
        if self.tick_interval_secs == 0 {
            return Err(crate::Error::config(format!(
                "Scheduler for {}: tick interval must be > 0",
                self.log_type
            )));
        }
        if let Some(activation) = &self.activation {
            activation.validate()?;
        }
        Ok(())
    }
}

/// Recurring window outside which a scheduler only polls for the window start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// Poll interval while waiting for the window to open
    #[serde(default = "default_pre_activation_poll_secs")]
    pub pre_activation_poll_secs: u64,

    /// The window itself
    pub window: MonthlyWindowConfig,
}

impl ActivationConfig {
    pub fn pre_activation_poll(&self) -> Duration {
        Duration::from_secs(self.pre_activation_poll_secs)
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.pre_activation_poll_secs == 0 {
            return Err(crate::Error::config("Pre-activation poll interval must be > 0"));
        }
        self.window.validate()
    }
}

/// Window recurring every month, bounds in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyWindowConfig {
    pub start_day: u32,
    pub start_hour: u32,
    pub end_day: u32,
    pub end_hour: u32,
}

impl MonthlyWindowConfig {
    /// Clan games: 22nd 08:00 to 28th 08:00 UTC
    pub fn clan_games() -> Self {
        Self {
            start_day: 22,
            start_hour: 8,
            end_day: 28,
            end_hour: 8,
        }
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        let valid_day = |d: u32| (1..=28).contains(&d);
        if !valid_day(self.start_day) || !valid_day(self.end_day) {
            return Err(crate::Error::config(
                "Monthly window days must be between 1 and 28",
            ));
        }
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(crate::Error::config(
                "Monthly window hours must be between 0 and 23",
            ));
        }
        if (self.start_day, self.start_hour) >= (self.end_day, self.end_hour) {
            return Err(crate::Error::config(
                "Monthly window must end after it starts",
            ));
        }
        Ok(())
    }
}

fn default_webhook_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_transport_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_refresh_window_secs() -> u64 {
    30 * 60
}

fn default_tick_interval_secs() -> u64 {
    5 * 60
}

fn default_inter_item_delay_millis() -> u64 {
    250
}

fn default_pre_activation_poll_secs() -> u64 {
    60
}
