// # clanfeedd - Log Notification Daemon
//
// Thin integration layer over clanfeed-core. No dispatch, retry or
// rendering logic lives here.
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing tracing and the runtime
// 3. Wiring the store, transport, snapshot source and log families
// 4. Warming the log cache and starting the digest schedulers
// 5. Optionally feeding upstream events from stdin
// 6. Shutting down cleanly on SIGINT/SIGTERM
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Store
// - `CLANFEED_STORE_TYPE`: file or memory (default file)
// - `CLANFEED_STORE_PATH`: Path to the store file (for file store)
//
// ### Shard
// - `CLANFEED_GUILD_IDS`: Comma-separated guild ids handled by this process
//
// ### Transport
// - `CLANFEED_WEBHOOK_API_BASE`: Webhook API base URL
// - `CLANFEED_DRY_RUN`: Log instead of posting (true/false)
//
// ### Digest schedulers
// - `CLANFEED_SNAPSHOT_URL`: Snapshot service base URL (unset disables the schedulers)
// - `CLANFEED_SNAPSHOT_TOKEN`: Bearer token for the snapshot service
// - `CLANFEED_REFRESH_WINDOW_SECS`: Minimum age of a digest before it is refreshed
// - `CLANFEED_INTER_ITEM_DELAY_MS`: Pause between two refreshed logs
//
// ### Dispatch
// - `CLANFEED_MAX_RETRIES`: Consecutive transient failures before a log is disabled
// - `CLANFEED_FEED_STDIN`: Read NDJSON `{"key": .., "feed": ..}` events from stdin
//
// ## Example
//
// ```bash
// export CLANFEED_STORE_PATH=/var/lib/clanfeed/logs.json
// export CLANFEED_GUILD_IDS=509784317598105619,1130572457175175293
// export CLANFEED_SNAPSHOT_URL=https://stats.example/v1
// export CLANFEED_SNAPSHOT_TOKEN=your_token
//
// clanfeedd
// ```

use anyhow::{Context, Result};
use clanfeed_core::config::{
    ActivationConfig, DispatchConfig, MonthlyWindowConfig, SchedulerConfig, StoreConfig,
    TransportConfig,
};
use clanfeed_core::model::{Feed, GuildId, LogType, RouteKey, normalize_tag};
use clanfeed_core::store::{FileLogStoreFactory, MemoryLogStoreFactory};
use clanfeed_core::traits::{
    ChannelDirectory, LogStore, LogStoreFactory, StaticChannelDirectory, Transport,
    TransportFactory,
};
use clanfeed_core::{
    DispatchCore, DispatchEvent, FamilyRegistry, LogRegistry, Scheduler, SchedulerHandle,
};
use clanfeed_webhook::WebhookTransportFactory;
use serde::Deserialize;
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Pull-style families driven by a scheduler
const DIGEST_TYPES: [LogType; 4] = [
    LogType::LegendDigest,
    LogType::ClanGamesDigest,
    LogType::CapitalDigest,
    LogType::LastSeenDigest,
];

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum ClanfeedExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<ClanfeedExitCode> for ExitCode {
    fn from(code: ClanfeedExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    store_type: String,
    store_path: Option<String>,
    guild_ids: Vec<u64>,
    webhook_api_base: Option<String>,
    dry_run: bool,
    snapshot_url: Option<String>,
    snapshot_token: Option<String>,
    max_retries: Option<u32>,
    refresh_window_secs: Option<u64>,
    inter_item_delay_ms: Option<u64>,
    feed_stdin: bool,
    log_level: String,
}

/// Read an optional variable and parse it
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} is not valid ({}): {}", name, raw, e)),
        _ => Ok(None),
    }
}

fn parse_bool(name: &str) -> Result<bool> {
    match env::var(name).map(|v| v.trim().to_ascii_lowercase()) {
        Ok(v) if v == "true" || v == "1" || v == "yes" => Ok(true),
        Ok(v) if v == "false" || v == "0" || v == "no" || v.is_empty() => Ok(false),
        Ok(v) => anyhow::bail!("{} must be true or false. Got: {}", name, v),
        Err(_) => Ok(false),
    }
}

fn parse_guild_ids(raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .with_context(|| format!("CLANFEED_GUILD_IDS contains an invalid id: '{}'", s))
        })
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            store_type: env::var("CLANFEED_STORE_TYPE").unwrap_or_else(|_| "file".to_string()),
            store_path: env::var("CLANFEED_STORE_PATH").ok(),
            guild_ids: parse_guild_ids(&env::var("CLANFEED_GUILD_IDS").unwrap_or_default())?,
            webhook_api_base: env::var("CLANFEED_WEBHOOK_API_BASE").ok(),
            dry_run: parse_bool("CLANFEED_DRY_RUN")?,
            snapshot_url: env::var("CLANFEED_SNAPSHOT_URL")
                .ok()
                .filter(|u| !u.is_empty()),
            snapshot_token: env::var("CLANFEED_SNAPSHOT_TOKEN").ok(),
            max_retries: parse_var("CLANFEED_MAX_RETRIES")?,
            refresh_window_secs: parse_var("CLANFEED_REFRESH_WINDOW_SECS")?,
            inter_item_delay_ms: parse_var("CLANFEED_INTER_ITEM_DELAY_MS")?,
            feed_stdin: parse_bool("CLANFEED_FEED_STDIN")?,
            log_level: env::var("CLANFEED_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        match self.store_type.as_str() {
            "file" | "memory" => {}
            _ => anyhow::bail!(
                "CLANFEED_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.store_type
            ),
        }

        if self.store_type == "file" {
            match self.store_path.as_deref() {
                None | Some("") => anyhow::bail!(
                    "CLANFEED_STORE_PATH is required when CLANFEED_STORE_TYPE=file. \
                    Set it via: export CLANFEED_STORE_PATH=/var/lib/clanfeed/logs.json"
                ),
                Some(path) => {
                    if let Some(parent) = std::path::Path::new(path).parent()
                        && !parent.as_os_str().is_empty()
                        && !parent.exists()
                    {
                        anyhow::bail!(
                            "CLANFEED_STORE_PATH parent directory does not exist: {}. \
                            Create it first: sudo mkdir -p {}",
                            parent.display(),
                            parent.display()
                        );
                    }
                }
            }
        }

        if self.guild_ids.is_empty() {
            anyhow::bail!(
                "CLANFEED_GUILD_IDS must contain at least one guild id. \
                Set it via: export CLANFEED_GUILD_IDS=509784317598105619"
            );
        }

        if let Some(api_base) = &self.webhook_api_base
            && !api_base.starts_with("https://")
            && !api_base.starts_with("http://")
        {
            anyhow::bail!(
                "CLANFEED_WEBHOOK_API_BASE must use HTTP or HTTPS scheme. Got: {}",
                api_base
            );
        }

        if let Some(url) = &self.snapshot_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                anyhow::bail!("CLANFEED_SNAPSHOT_URL must use HTTP or HTTPS scheme. Got: {}", url);
            }
            if url.starts_with("http://") && self.snapshot_token.is_some() {
                eprintln!(
                    "WARNING: CLANFEED_SNAPSHOT_URL uses HTTP (not HTTPS) and a token is set. \
                    The token is sent in clear text."
                );
            }
            if cfg!(not(feature = "http-source")) {
                anyhow::bail!("CLANFEED_SNAPSHOT_URL is set but clanfeedd was built without the http-source feature");
            }
        }

        if let Some(max_retries) = self.max_retries
            && !(1..=10).contains(&max_retries)
        {
            anyhow::bail!("CLANFEED_MAX_RETRIES must be between 1 and 10. Got: {}", max_retries);
        }

        if let Some(window) = self.refresh_window_secs
            && !(60..=86_400).contains(&window)
        {
            anyhow::bail!(
                "CLANFEED_REFRESH_WINDOW_SECS must be between 60 and 86400 seconds. Got: {}",
                window
            );
        }

        if let Some(delay) = self.inter_item_delay_ms
            && delay > 60_000
        {
            anyhow::bail!("CLANFEED_INTER_ITEM_DELAY_MS must be at most 60000. Got: {}", delay);
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "CLANFEED_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn store_config(&self) -> StoreConfig {
        match (self.store_type.as_str(), &self.store_path) {
            ("file", Some(path)) => StoreConfig::File { path: path.clone() },
            _ => StoreConfig::Memory,
        }
    }

    fn transport_config(&self) -> TransportConfig {
        let mut config = TransportConfig::default();
        let TransportConfig::Webhook {
            api_base, dry_run, ..
        } = &mut config;
        if let Some(base) = &self.webhook_api_base {
            *api_base = base.clone();
        }
        *dry_run = self.dry_run;
        config
    }

    fn dispatch_config(&self) -> DispatchConfig {
        let mut config = DispatchConfig::default();
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        config
    }

    fn scheduler_config(&self, log_type: LogType) -> SchedulerConfig {
        let mut config = SchedulerConfig::new(log_type);
        if let Some(window) = self.refresh_window_secs {
            config = config.with_refresh_window(Duration::from_secs(window));
        }
        if let Some(delay) = self.inter_item_delay_ms {
            config = config.with_inter_item_delay(Duration::from_millis(delay));
        }
        if log_type == LogType::ClanGamesDigest {
            config = config.with_activation(ActivationConfig {
                pre_activation_poll_secs: 60,
                window: MonthlyWindowConfig::clan_games(),
            });
        }
        config
    }
}

/// One line of the stdin feed
#[derive(Debug, Deserialize)]
struct FeedLine {
    key: RouteKey,
    feed: Feed,
}

/// Parse one NDJSON line into a dispatch call, normalizing entity tags
fn parse_feed_line(line: &str) -> Result<(RouteKey, Feed)> {
    let FeedLine { key, mut feed } = serde_json::from_str(line)?;
    let key = match key {
        RouteKey::Entity(tag) => RouteKey::entity(&tag),
        other => other,
    };
    feed.entity_tag = normalize_tag(&feed.entity_tag);
    Ok((key, feed))
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ClanfeedExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return ClanfeedExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ClanfeedExitCode::ConfigError.into();
    }

    info!("Starting clanfeedd daemon");
    info!("Configuration loaded: {} guild(s)", config.guild_ids.len());

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ClanfeedExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            ClanfeedExitCode::RuntimeError
        } else {
            ClanfeedExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let store_config = config.store_config();
    info!("Store type: {}", store_config.type_name());
    let store: Arc<dyn LogStore> = match &store_config {
        StoreConfig::File { .. } => Arc::from(FileLogStoreFactory.create(&store_config).await?),
        StoreConfig::Memory => Arc::from(MemoryLogStoreFactory.create(&store_config).await?),
    };

    let directory: Arc<dyn ChannelDirectory> = Arc::new(StaticChannelDirectory::permissive(
        config.guild_ids.iter().copied().map(GuildId),
    ));
    let families = Arc::new(FamilyRegistry::with_builtin_families());

    let registry = Arc::new(LogRegistry::new(Arc::clone(&store), Arc::clone(&directory)));
    let cached = registry
        .init(&LogType::ALL)
        .await
        .context("Failed to load logs from the store")?;
    info!("Cached {} enabled log(s)", cached);

    let transport: Arc<dyn Transport> =
        Arc::from(WebhookTransportFactory.create(&config.transport_config())?);

    let (dispatch, events) = DispatchCore::new(
        Arc::clone(&registry),
        Arc::clone(&families),
        transport,
        Arc::clone(&directory),
        &config.dispatch_config(),
    )?;
    let dispatch = Arc::new(dispatch);
    let event_task = tokio::spawn(log_events(events));

    let mut schedulers: Vec<SchedulerHandle> = Vec::new();
    match &config.snapshot_url {
        Some(url) => {
            let source = build_source(url, config.snapshot_token.clone(), Arc::clone(&families))?;
            for log_type in DIGEST_TYPES {
                let scheduler = Scheduler::new(
                    config.scheduler_config(log_type),
                    Arc::clone(&store),
                    Arc::clone(&registry),
                    Arc::clone(&dispatch),
                    Arc::clone(&directory),
                    Arc::clone(&source),
                )?;
                info!("Starting {} scheduler", log_type);
                schedulers.push(Arc::new(scheduler).start());
            }
        }
        None => warn!("CLANFEED_SNAPSHOT_URL not set, digest schedulers disabled"),
    }

    let feed = if config.feed_stdin {
        let (tx, rx) = oneshot::channel();
        let dispatch = Arc::clone(&dispatch);
        let task = tokio::spawn(async move { dispatch.run_feed_stream(stdin_feed(), Some(rx)).await });
        Some((tx, task))
    } else {
        None
    };

    info!("Daemon initialized successfully");

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);
    info!("Shutting down daemon");

    if let Some((tx, task)) = feed {
        // The stream may already have ended on EOF
        let _ = tx.send(());
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Feed stream ended with error: {}", e),
            Err(e) => error!("Feed stream task failed: {}", e),
        }
    }

    for scheduler in schedulers {
        let log_type = scheduler.log_type();
        scheduler.stop().await;
        debug!("Stopped {} scheduler", log_type);
    }

    registry
        .shutdown()
        .await
        .context("Failed to flush the store on shutdown")?;

    drop(dispatch);
    event_task.abort();

    Ok(())
}

#[cfg(feature = "http-source")]
fn build_source(
    url: &str,
    token: Option<String>,
    families: Arc<FamilyRegistry>,
) -> Result<Arc<dyn clanfeed_core::SnapshotSource>> {
    use clanfeed_core::config::SourceConfig;
    use clanfeed_core::traits::SnapshotSourceFactory;
    use clanfeed_source_http::HttpSourceFactory;

    let config = SourceConfig::Http {
        base_url: url.to_string(),
        token,
        timeout_secs: 30,
    };
    Ok(Arc::from(HttpSourceFactory::new(families).create(&config)?))
}

#[cfg(not(feature = "http-source"))]
fn build_source(
    _url: &str,
    _token: Option<String>,
    _families: Arc<FamilyRegistry>,
) -> Result<Arc<dyn clanfeed_core::SnapshotSource>> {
    anyhow::bail!("clanfeedd was built without a snapshot source")
}

/// Stream of `(key, feed)` pairs read from stdin, skipping malformed lines
fn stdin_feed() -> impl tokio_stream::Stream<Item = (RouteKey, Feed)> + Unpin + Send {
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio_stream::StreamExt;
    use tokio_stream::wrappers::LinesStream;

    let lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    Box::pin(lines.filter_map(|line| match line {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => match parse_feed_line(&line) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping malformed feed line: {}", e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to read feed line: {}", e);
            None
        }
    }))
}

/// Surface dispatch events in the log
async fn log_events(mut events: mpsc::Receiver<DispatchEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            DispatchEvent::Delivered {
                log_id,
                message_id,
                edited,
            } => debug!(%log_id, %message_id, edited, "Delivered"),
            DispatchEvent::MessageGone { log_id, message_id } => {
                info!(%log_id, %message_id, "Message was deleted, posting a new one")
            }
            DispatchEvent::RenderFailed { log_id, reason } => {
                warn!(%log_id, "Render failed: {}", reason)
            }
            DispatchEvent::DeliveryFailed {
                log_id,
                reason,
                retries,
            } => warn!(%log_id, retries, "Delivery failed: {}", reason),
            DispatchEvent::LogDisabled { log_id, reason } => {
                warn!(%log_id, "Log disabled: {}", reason)
            }
            DispatchEvent::FeedStreamStarted => info!("Feed stream started"),
            DispatchEvent::FeedStreamStopped { reason } => info!("Feed stream stopped: {}", reason),
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clanfeed_core::model::LogId;

    fn config() -> Config {
        Config {
            store_type: "memory".to_string(),
            store_path: None,
            guild_ids: vec![1],
            webhook_api_base: None,
            dry_run: false,
            snapshot_url: None,
            snapshot_token: None,
            max_retries: None,
            refresh_window_secs: None,
            inter_item_delay_ms: None,
            feed_stdin: false,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_minimal_config_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_file_store_requires_path() {
        let cfg = Config {
            store_type: "file".to_string(),
            ..config()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("CLANFEED_STORE_PATH"));
    }

    #[test]
    fn test_guild_ids_required() {
        let cfg = Config {
            guild_ids: vec![],
            ..config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_numeric_ranges() {
        let cfg = Config {
            max_retries: Some(0),
            ..config()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            refresh_window_secs: Some(30),
            ..config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_parse_guild_ids() {
        assert_eq!(parse_guild_ids("1, 2,,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_guild_ids("1,abc").is_err());
        assert!(parse_guild_ids("").unwrap().is_empty());
    }

    #[test]
    fn test_clan_games_scheduler_has_activation_window() {
        let cfg = config();
        assert!(cfg.scheduler_config(LogType::ClanGamesDigest).activation.is_some());
        assert!(cfg.scheduler_config(LogType::LegendDigest).activation.is_none());
    }

    #[test]
    fn test_transport_config_overrides() {
        let cfg = Config {
            webhook_api_base: Some("http://localhost:8080/api".to_string()),
            dry_run: true,
            ..config()
        };
        let TransportConfig::Webhook {
            api_base, dry_run, ..
        } = cfg.transport_config();
        assert_eq!(api_base, "http://localhost:8080/api");
        assert!(dry_run);
    }

    #[test]
    fn test_parse_feed_line_normalizes_tags() {
        let line = r#"{"key": {"type": "entity", "value": "2pp"}, "feed": {"logType": "member_log", "entityTag": "2pp", "payload": {"event": "joined"}}}"#;
        let (key, feed) = parse_feed_line(line).unwrap();
        assert_eq!(key, RouteKey::entity("#2PP"));
        assert_eq!(feed.entity_tag, "#2PP");
        assert_eq!(feed.log_type, LogType::MemberLog);

        let line = r##"{"key": {"type": "log", "value": "42"}, "feed": {"logType": "legend_digest", "entityTag": "#AAA", "payload": {}}}"##;
        let (key, _) = parse_feed_line(line).unwrap();
        assert_eq!(key, RouteKey::Log(LogId::from("42")));

        assert!(parse_feed_line("not json").is_err());
    }
}
