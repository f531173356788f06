//! Dispatch engine
//!
//! [`DispatchCore::exec`] is the single entry point for delivering a feed:
//! upstream event handlers call it with an entity key, schedulers call it
//! with a log key.
//!
//! ## Per-entry flow
//!
//! ```text
//!  matching(key) ──► type check ──► in-flight guard ──► preconditions
//!                                                           │
//!                                                           ▼
//!                     failure policy ◄── transport ◄── render ──► send or edit
//! ```
//!
//! Every matched entry runs independently: a render error, a delivery
//! failure or a panic on one entry never affects the others of the same call.
//!
//! ## Send or edit
//!
//! A log edits its message only while the message belongs to the current
//! period of its family ([`Period`](crate::model::Period)). Otherwise it sends
//! a new message and remembers the new id:
//!
//! ```text
//!  NEW ──send──► SENT(id) ──edit──► EDITED* ──period rollover──► NEW
//! ```
//!
//! ## Failure policy
//!
//! - Permanent failures (unauthorized, forbidden, target gone, unresolvable
//!   channel) evict the log and disable it in the store.
//! - Transient failures (rate limits, timeouts, unclassified, missing
//!   permissions) increment `retries`; reaching `max_retries` disables the log.
//! - An edit of a deleted message clears the message id and sends a new one
//!   within the same call.
//! - Render errors are logged and leave the log untouched.

mod in_flight;

pub use in_flight::{InFlightGuard, InFlightSet};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::join_all;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEntry, LogRegistry};
use crate::config::DispatchConfig;
use crate::error::Result;
use crate::model::{Feed, LogConfig, LogId, MessageId, Permission, RouteKey};
use crate::registry::FamilyRegistry;
use crate::traits::{ChannelDirectory, DeliveryRequest, FailureSeverity, LogFamily, Transport};

/// What happened to one matched log during an `exec` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A new message was posted
    Sent { message_id: MessageId },
    /// The current message was edited in place
    Edited { message_id: MessageId },
    /// The log serves another family than the feed
    SkippedTypeMismatch,
    /// Another dispatch of the same log was running; this one was dropped
    SkippedInFlight,
    /// The feed could not be rendered for this log
    RenderFailed { reason: String },
    /// Transient failure, the log stays cached
    Retrying { retries: u32 },
    /// The log was evicted and disabled
    Disabled { reason: String },
    /// The log left the cache while its dispatch was running
    Evicted,
    /// The dispatch of this log panicked
    Aborted { reason: String },
}

impl Outcome {
    /// Whether a message reached the channel
    pub fn is_delivered(&self) -> bool {
        matches!(self, Outcome::Sent { .. } | Outcome::Edited { .. })
    }
}

/// Per-log outcomes of one `exec` call, ordered by log id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecReport {
    pub outcomes: Vec<(LogId, Outcome)>,
}

impl ExecReport {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcome(&self, id: &LogId) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(log_id, _)| log_id == id)
            .map(|(_, outcome)| outcome)
    }

    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_delivered()).count()
    }
}

/// Events emitted by the dispatcher for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Delivered {
        log_id: LogId,
        message_id: MessageId,
        edited: bool,
    },
    RenderFailed {
        log_id: LogId,
        reason: String,
    },
    DeliveryFailed {
        log_id: LogId,
        reason: String,
        retries: u32,
    },
    /// An edit hit a deleted message; a new one is sent instead
    MessageGone {
        log_id: LogId,
        message_id: MessageId,
    },
    LogDisabled {
        log_id: LogId,
        reason: String,
    },
    FeedStreamStarted,
    FeedStreamStopped {
        reason: String,
    },
}

/// Core dispatch engine
///
/// Shared as `Arc<DispatchCore>` by the feed stream and the schedulers.
pub struct DispatchCore {
    registry: Arc<LogRegistry>,
    families: Arc<FamilyRegistry>,
    transport: Arc<dyn Transport>,
    directory: Arc<dyn ChannelDirectory>,
    in_flight: InFlightSet,
    max_retries: u32,
    event_tx: mpsc::Sender<DispatchEvent>,
}

impl DispatchCore {
    /// Create a dispatcher and the receiver of its events
    pub fn new(
        registry: Arc<LogRegistry>,
        families: Arc<FamilyRegistry>,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn ChannelDirectory>,
        config: &DispatchConfig,
    ) -> Result<(Self, mpsc::Receiver<DispatchEvent>)> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);

        let core = Self {
            registry,
            families,
            transport,
            directory,
            in_flight: InFlightSet::new(),
            max_retries: config.max_retries,
            event_tx,
        };
        Ok((core, event_rx))
    }

    pub fn registry(&self) -> &Arc<LogRegistry> {
        &self.registry
    }

    pub fn families(&self) -> &Arc<FamilyRegistry> {
        &self.families
    }

    /// Logs currently being dispatched
    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    /// Deliver `feed` to every cached log matching `key`
    pub async fn exec(&self, key: &RouteKey, feed: &Feed) -> ExecReport {
        let entries = self.registry.matching(key);
        if entries.is_empty() {
            debug!(%key, "No cached log matches");
            return ExecReport::default();
        }

        let runs = entries.into_iter().map(|entry| {
            let id = entry.config.id.clone();
            async move {
                let outcome = AssertUnwindSafe(self.exec_entry(entry, feed))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        let reason = panic_message(panic.as_ref());
                        error!(log = %id, "Dispatch panicked: {}", reason);
                        Outcome::Aborted { reason }
                    });
                (id, outcome)
            }
        });

        ExecReport {
            outcomes: join_all(runs).await,
        }
    }

    async fn exec_entry(&self, entry: CacheEntry, feed: &Feed) -> Outcome {
        if entry.config.log_type != feed.log_type {
            debug!(log = %entry.config.id, log_type = %entry.config.log_type, feed_type = %feed.log_type, "Feed type does not match log, skipping");
            return Outcome::SkippedTypeMismatch;
        }

        let Some(_guard) = self.in_flight.try_acquire(entry.id()) else {
            debug!(log = %entry.config.id, "Log already in flight, dropping dispatch");
            return Outcome::SkippedInFlight;
        };

        // The matched entry may predate a delivery that finished before the guard was taken
        let Some(current) = self.registry.get(entry.id()) else {
            debug!(log = %entry.config.id, "Log left the cache before dispatch");
            return Outcome::Evicted;
        };
        let log = current.config;

        let family = match self.families.get(log.log_type) {
            Ok(family) => family,
            Err(e) => return self.render_failed(&log.id, e.to_string()),
        };

        if let Err((severity, reason)) = self.check_preconditions(&log, family.as_ref()).await {
            return self.apply_failure(&log.id, severity, reason).await;
        }

        let payload = match family.render(feed, &log) {
            Ok(payload) => payload,
            Err(e) => return self.render_failed(&log.id, e.to_string()),
        };

        let request = DeliveryRequest::from_config(&log);
        let now = Utc::now();

        if let Some(message_id) = &log.message_id {
            if family.period().allows_edit(log.last_posted_at, now) {
                match self.transport.edit(&request, message_id, &payload).await {
                    Ok(()) => return self.delivered(&log.id, message_id.clone(), now, true).await,
                    Err(e) if e.severity() == FailureSeverity::MessageGone => {
                        info!(log = %log.id, message = %message_id, "Message was deleted, sending a new one");
                        self.emit(DispatchEvent::MessageGone {
                            log_id: log.id.clone(),
                            message_id: message_id.clone(),
                        });
                        self.registry.clear_message(&log.id).await;
                    }
                    Err(e) => return self.apply_failure(&log.id, e.severity(), e.to_string()).await,
                }
            } else {
                debug!(
                    log = %log.id,
                    message = %message_id,
                    period_start = ?family.period().period_start(now),
                    "Period rolled over, starting a new message"
                );
                self.registry.clear_message(&log.id).await;
            }
        }

        match self.transport.send(&request, &payload).await {
            Ok(message_id) => self.delivered(&log.id, message_id, now, false).await,
            Err(e) => self.apply_failure(&log.id, e.severity(), e.to_string()).await,
        }
    }

    /// Channel still resolvable and every required permission present
    async fn check_preconditions(
        &self,
        log: &LogConfig,
        family: &dyn LogFamily,
    ) -> std::result::Result<(), (FailureSeverity, String)> {
        let Some(channel) = self.directory.resolve(log.channel_id, log.thread_id).await else {
            return Err((
                FailureSeverity::Permanent,
                format!("channel {} is no longer resolvable", log.channel_id),
            ));
        };

        let mut required = family.required_permissions().to_vec();
        if log.thread_id.is_some() {
            required.push(Permission::SendMessagesInThreads);
        }
        let missing = channel.missing(&required);
        if missing.is_empty() {
            Ok(())
        } else {
            Err((
                FailureSeverity::Transient,
                format!("missing permissions in channel {}: {:?}", log.channel_id, missing),
            ))
        }
    }

    async fn delivered(
        &self,
        id: &LogId,
        message_id: MessageId,
        posted_at: DateTime<Utc>,
        edited: bool,
    ) -> Outcome {
        if self
            .registry
            .record_success(id, message_id.clone(), posted_at)
            .await
            .is_none()
        {
            warn!(log = %id, message = %message_id, "Log left the cache during delivery, state not recorded");
            return Outcome::Evicted;
        }

        debug!(log = %id, message = %message_id, edited, "Delivered");
        self.emit(DispatchEvent::Delivered {
            log_id: id.clone(),
            message_id: message_id.clone(),
            edited,
        });
        if edited {
            Outcome::Edited { message_id }
        } else {
            Outcome::Sent { message_id }
        }
    }

    async fn apply_failure(&self, id: &LogId, severity: FailureSeverity, reason: String) -> Outcome {
        if severity == FailureSeverity::Permanent {
            warn!(log = %id, "Permanent delivery failure: {}", reason);
            return self.disable(id, reason).await;
        }

        let Some(retries) = self.registry.record_failure(id).await else {
            return Outcome::Evicted;
        };
        self.emit(DispatchEvent::DeliveryFailed {
            log_id: id.clone(),
            reason: reason.clone(),
            retries,
        });

        if retries >= self.max_retries {
            warn!(log = %id, retries, "Retry budget exhausted: {}", reason);
            self.disable(id, format!("{} consecutive failures, last: {}", retries, reason))
                .await
        } else {
            warn!(log = %id, retries, max_retries = self.max_retries, "Transient delivery failure: {}", reason);
            Outcome::Retrying { retries }
        }
    }

    async fn disable(&self, id: &LogId, reason: String) -> Outcome {
        if let Err(e) = self.registry.disable(id).await {
            warn!(log = %id, "Failed to persist disabled state: {}", e);
        }
        info!(log = %id, "Log disabled: {}", reason);
        self.emit(DispatchEvent::LogDisabled {
            log_id: id.clone(),
            reason: reason.clone(),
        });
        Outcome::Disabled { reason }
    }

    fn render_failed(&self, id: &LogId, reason: String) -> Outcome {
        warn!(log = %id, "Render failed: {}", reason);
        self.emit(DispatchEvent::RenderFailed {
            log_id: id.clone(),
            reason: reason.clone(),
        });
        Outcome::RenderFailed { reason }
    }

    /// Run `exec` for every `(key, feed)` of a push-style stream
    ///
    /// Returns when the stream ends or `shutdown_rx` fires, after flushing the store.
    pub async fn run_feed_stream<S>(
        &self,
        mut feeds: S,
        mut shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()>
    where
        S: Stream<Item = (RouteKey, Feed)> + Unpin,
    {
        self.emit(DispatchEvent::FeedStreamStarted);

        let reason = loop {
            tokio::select! {
                item = feeds.next() => match item {
                    Some((key, feed)) => {
                        let report = self.exec(&key, &feed).await;
                        debug!(%key, logs = report.outcomes.len(), delivered = report.delivered(), "Feed dispatched");
                    }
                    None => break "Feed stream ended",
                },
                _ = wait_for_shutdown(&mut shutdown_rx) => break "Shutdown signal",
            }
        };

        info!("{}", reason);
        self.emit(DispatchEvent::FeedStreamStopped {
            reason: reason.to_string(),
        });
        self.registry.store().flush().await
    }

    fn emit(&self, event: DispatchEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Dispatch event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

async fn wait_for_shutdown(rx: &mut Option<oneshot::Receiver<()>>) {
    match rx {
        Some(rx) => {
            let _ = rx.await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
