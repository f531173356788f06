//! Refresh scheduler for pull-style log families
//!
//! Digests have no upstream event; their content is a snapshot that has to
//! be fetched. A [`Scheduler`] drives one log family:
//!
//! 1. Find the enabled logs of its family, in the managed guilds, whose last
//!    post is older than the refresh window
//! 2. For each log not already in flight: fetch a snapshot, call
//!    [`DispatchCore::exec`], release, pause for the inter-item delay
//! 3. Re-arm for the next tick, whatever the outcome of this one
//!
//! ## Activation window
//!
//! With an [`ActivationWindow`], the loop polls at the pre-activation
//! interval until the window opens, ticks while it stays open, and goes back
//! to polling once it closes.
//!
//! ## Lifecycle
//!
//! ```rust,ignore
//! let scheduler = Arc::new(Scheduler::new(config, store, registry, dispatch, directory, source)?);
//! let handle = scheduler.start();
//! // ...
//! handle.stop().await;
//! ```

mod window;

pub use window::{ActivationWindow, MonthlyWindow};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::LogRegistry;
use crate::config::SchedulerConfig;
use crate::dispatch::{DispatchCore, InFlightSet};
use crate::error::{Error, Result};
use crate::model::{LogType, RouteKey};
use crate::traits::{ChannelDirectory, LogFilter, LogStore, SnapshotSource};

/// Counters of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Logs past their refresh window
    pub due: usize,
    /// Logs handed to the dispatcher
    pub dispatched: usize,
    /// Dispatches that reached the channel
    pub delivered: usize,
    /// Due logs already being refreshed by an overlapping tick
    pub skipped_in_flight: usize,
    /// Due logs with no snapshot available
    pub no_snapshot: usize,
    /// Snapshot fetches that failed
    pub fetch_failed: usize,
}

/// Self-re-arming refresh loop for one log family
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn LogStore>,
    registry: Arc<LogRegistry>,
    dispatch: Arc<DispatchCore>,
    directory: Arc<dyn ChannelDirectory>,
    source: Arc<dyn SnapshotSource>,
    window: Option<Arc<dyn ActivationWindow>>,
    in_flight: InFlightSet,
    stopping: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn LogStore>,
        registry: Arc<LogRegistry>,
        dispatch: Arc<DispatchCore>,
        directory: Arc<dyn ChannelDirectory>,
        source: Arc<dyn SnapshotSource>,
    ) -> Result<Self> {
        config.validate()?;
        let window = config
            .activation
            .as_ref()
            .map(|activation| Arc::new(MonthlyWindow::new(&activation.window)) as Arc<dyn ActivationWindow>);
        let (stopping, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            registry,
            dispatch,
            directory,
            source,
            window,
            in_flight: InFlightSet::new(),
            stopping,
        })
    }

    /// Gate ticking on a custom window
    pub fn with_window(mut self, window: Arc<dyn ActivationWindow>) -> Self {
        self.window = Some(window);
        self
    }

    pub fn log_type(&self) -> LogType {
        self.config.log_type
    }

    /// Logs currently being refreshed by this scheduler
    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    /// Refresh every due log once
    pub async fn tick(&self) -> Result<TickReport> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.refresh_window())
                .map_err(|e| Error::config(format!("Invalid refresh window: {}", e)))?;
        let guilds = self.directory.managed_guilds().await;
        let filter = LogFilter::enabled()
            .with_log_type(self.config.log_type)
            .in_guilds(guilds)
            .posted_before(cutoff);
        let due = self.store.find(&filter).await?;

        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };
        debug!(log_type = %self.config.log_type, due = due.len(), "Scheduler tick");

        for (index, stored) in due.iter().enumerate() {
            if self.is_stopping() {
                debug!(log_type = %self.config.log_type, "Stop requested, ending tick early");
                break;
            }

            let Some(guard) = self.in_flight.try_acquire(&stored.id) else {
                report.skipped_in_flight += 1;
                continue;
            };

            // The cache is authoritative; a log refreshed or disabled since the query is skipped
            let Some(entry) = self.registry.get(&stored.id) else {
                debug!(log = %stored.id, "Due log is not cached, skipping");
                continue;
            };
            if entry.config.last_posted_at >= cutoff {
                debug!(log = %stored.id, "Log was refreshed since the query, skipping");
                continue;
            }

            match self.source.fetch(&entry.config).await {
                Ok(Some(feed)) => {
                    let outcome = self.dispatch.exec(&RouteKey::Log(stored.id.clone()), &feed).await;
                    report.dispatched += 1;
                    report.delivered += outcome.delivered();
                }
                Ok(None) => {
                    debug!(log = %stored.id, source = self.source.source_name(), "No snapshot available");
                    report.no_snapshot += 1;
                }
                Err(e) => {
                    warn!(log = %stored.id, source = self.source.source_name(), "Snapshot fetch failed: {}", e);
                    report.fetch_failed += 1;
                }
            }
            drop(guard);

            if index + 1 < due.len() && self.pause(self.config.inter_item_delay()).await {
                break;
            }
        }

        Ok(report)
    }

    /// Spawn the refresh loop
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        self.stopping.send_replace(false);
        let scheduler = Arc::clone(&self);
        let task = tokio::spawn(async move { scheduler.run().await });
        info!(log_type = %self.config.log_type, "Scheduler started");
        SchedulerHandle {
            scheduler: self,
            task,
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            if let Some(window) = &self.window
                && !window.is_open(Utc::now())
            {
                let poll = self
                    .config
                    .activation
                    .as_ref()
                    .map(|activation| activation.pre_activation_poll())
                    .unwrap_or_else(|| self.config.tick_interval());
                debug!(log_type = %self.config.log_type, "Activation window closed, polling");
                if self.pause(poll).await {
                    break;
                }
                continue;
            }

            // A panicking tick only kills its own task
            let scheduler = Arc::clone(&self);
            match tokio::spawn(async move { scheduler.tick().await }).await {
                Ok(Ok(report)) => {
                    debug!(log_type = %self.config.log_type, ?report, "Tick finished");
                }
                Ok(Err(e)) => {
                    error!(log_type = %self.config.log_type, "Tick failed: {}", e);
                }
                Err(e) if e.is_panic() => {
                    error!(log_type = %self.config.log_type, "Tick panicked");
                }
                Err(e) => {
                    error!(log_type = %self.config.log_type, "Tick task failed: {}", e);
                }
            }

            if self.pause(self.config.tick_interval()).await {
                break;
            }
        }
        info!(log_type = %self.config.log_type, "Scheduler stopped");
    }

    fn is_stopping(&self) -> bool {
        *self.stopping.borrow()
    }

    /// Sleep for `duration`; returns true if a stop was requested meanwhile
    async fn pause(&self, duration: Duration) -> bool {
        let mut stopping = self.stopping.subscribe();
        if *stopping.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = stopping.changed() => true,
        }
    }
}

/// Handle to a running scheduler loop
pub struct SchedulerHandle {
    scheduler: Arc<Scheduler>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn log_type(&self) -> LogType {
        self.scheduler.log_type()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop and wait for it to exit
    ///
    /// A tick in progress finishes its current log first.
    pub async fn stop(self) {
        self.scheduler.stopping.send_replace(true);
        if let Err(e) = self.task.await {
            error!(log_type = %self.scheduler.log_type(), "Scheduler task ended abnormally: {}", e);
        }
    }
}
