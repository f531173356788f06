//! Test doubles and common utilities for contract tests
//!
//! The doubles count calls and replay scripted outcomes; they never sleep
//! or retry on their own.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use clanfeed_core::config::DispatchConfig;
use clanfeed_core::dispatch::{DispatchCore, DispatchEvent};
use clanfeed_core::model::{
    ChannelId, DeliveryTarget, Feed, GuildId, LogConfig, LogType, MessageId, MessagePayload,
};
use clanfeed_core::traits::{
    DeliveryError, DeliveryRequest, LogStore, SnapshotSource, StaticChannelDirectory, Transport,
};
use clanfeed_core::{FamilyRegistry, LogRegistry, MemoryLogStore};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, mpsc};

/// Guilds managed by the test process
pub const MANAGED: [GuildId; 2] = [GuildId(1), GuildId(2)];

/// A transport that replays scripted outcomes and records every call
///
/// Unscripted sends succeed with ids `m1`, `m2`, ...; unscripted edits succeed.
pub struct ScriptedTransport {
    send_script: Mutex<VecDeque<Result<MessageId, DeliveryError>>>,
    edit_script: Mutex<VecDeque<Result<(), DeliveryError>>>,
    send_count: Arc<AtomicUsize>,
    edit_count: Arc<AtomicUsize>,
    edited: Mutex<Vec<MessageId>>,
    next_id: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    /// When set, every call waits for a permit
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            send_script: Mutex::new(VecDeque::new()),
            edit_script: Mutex::new(VecDeque::new()),
            send_count: Arc::new(AtomicUsize::new(0)),
            edit_count: Arc::new(AtomicUsize::new(0)),
            edited: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// A transport whose calls block until the returned semaphore gets permits
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::new()
        };
        (transport, gate)
    }

    pub fn script_send(&self, outcome: Result<MessageId, DeliveryError>) {
        self.send_script.lock().unwrap().push_back(outcome);
    }

    pub fn script_send_failures(&self, count: usize, error: DeliveryError) {
        for _ in 0..count {
            self.script_send(Err(error.clone()));
        }
    }

    pub fn script_edit(&self, outcome: Result<(), DeliveryError>) {
        self.edit_script.lock().unwrap().push_back(outcome);
    }

    pub fn send_count(&self) -> usize {
        self.send_count.load(Ordering::SeqCst)
    }

    pub fn edit_count(&self) -> usize {
        self.edit_count.load(Ordering::SeqCst)
    }

    /// Message ids passed to `edit`, in call order
    pub fn edited_ids(&self) -> Vec<MessageId> {
        self.edited.lock().unwrap().clone()
    }

    /// Highest number of calls observed running at once
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        _request: &DeliveryRequest,
        _payload: &MessagePayload,
    ) -> Result<MessageId, DeliveryError> {
        self.send_count.fetch_add(1, Ordering::SeqCst);
        self.enter().await;
        let scripted = self.send_script.lock().unwrap().pop_front();
        let outcome = scripted.unwrap_or_else(|| {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(MessageId::new(format!("m{}", n)))
        });
        self.leave();
        outcome
    }

    async fn edit(
        &self,
        _request: &DeliveryRequest,
        message_id: &MessageId,
        _payload: &MessagePayload,
    ) -> Result<(), DeliveryError> {
        self.edit_count.fetch_add(1, Ordering::SeqCst);
        self.edited.lock().unwrap().push(message_id.clone());
        self.enter().await;
        let outcome = self.edit_script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        self.leave();
        outcome
    }

    fn transport_name(&self) -> &'static str {
        "scripted"
    }
}

/// What a [`MockSnapshotSource`] does on `fetch`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMode {
    /// Return a digest snapshot for the log
    Snapshot,
    /// Report that no snapshot exists
    Missing,
    /// Panic on the first call, then behave like `Snapshot`
    PanicOnce,
}

/// A snapshot source producing minimal digest payloads
pub struct MockSnapshotSource {
    mode: SnapshotMode,
    fetch_count: Arc<AtomicUsize>,
}

impl MockSnapshotSource {
    pub fn new(mode: SnapshotMode) -> Self {
        Self {
            mode,
            fetch_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for MockSnapshotSource {
    async fn fetch(&self, log: &LogConfig) -> clanfeed_core::Result<Option<Feed>> {
        let previous = self.fetch_count.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            SnapshotMode::Missing => Ok(None),
            SnapshotMode::PanicOnce if previous == 0 => panic!("snapshot source bug"),
            _ => Ok(Some(digest_feed(log.log_type, &log.entity_tag))),
        }
    }

    fn source_name(&self) -> &'static str {
        "mock"
    }
}

/// Store, cache, transport and dispatcher wired together
pub struct Harness {
    pub store: MemoryLogStore,
    pub directory: Arc<StaticChannelDirectory>,
    pub registry: Arc<LogRegistry>,
    pub transport: Arc<ScriptedTransport>,
    pub dispatch: Arc<DispatchCore>,
    pub events: mpsc::Receiver<DispatchEvent>,
}

impl Harness {
    pub async fn new(logs: Vec<LogConfig>) -> Self {
        Self::with_transport(logs, ScriptedTransport::new(), 3).await
    }

    pub async fn with_transport(
        logs: Vec<LogConfig>,
        transport: ScriptedTransport,
        max_retries: u32,
    ) -> Self {
        let store = MemoryLogStore::new();
        for log in logs {
            store.upsert(log).await.unwrap();
        }

        let directory = Arc::new(StaticChannelDirectory::permissive(MANAGED));
        let registry = Arc::new(LogRegistry::new(Arc::new(store.clone()), directory.clone()));
        registry.init(&LogType::ALL).await.unwrap();

        let transport = Arc::new(transport);
        let config = DispatchConfig {
            max_retries,
            ..DispatchConfig::default()
        };
        let (dispatch, events) = DispatchCore::new(
            Arc::clone(&registry),
            Arc::new(FamilyRegistry::with_builtin_families()),
            transport.clone(),
            directory.clone(),
            &config,
        )
        .unwrap();

        Self {
            store,
            directory,
            registry,
            transport,
            dispatch: Arc::new(dispatch),
            events,
        }
    }

    /// Stored record of a log
    pub async fn stored(&self, id: &str) -> LogConfig {
        self.store.get(&id.into()).await.unwrap().unwrap()
    }

    /// Every event emitted so far
    pub fn drain_events(&mut self) -> Vec<DispatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn target() -> DeliveryTarget {
    DeliveryTarget::new(9000, "webhook-token")
}

pub fn log(id: &str, guild: u64, tag: &str, log_type: LogType) -> LogConfig {
    LogConfig::new(id, GuildId(guild), tag, log_type, ChannelId(500 + guild), target())
}

/// A legend digest log last posted `hours` ago
pub fn legend_log(id: &str, guild: u64, tag: &str, hours: i64) -> LogConfig {
    let mut config = log(id, guild, tag, LogType::LegendDigest);
    config.last_posted_at = hours_ago(hours);
    config
}

pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

/// A snapshot every built-in digest family can render
pub fn digest_feed(log_type: LogType, tag: &str) -> Feed {
    Feed::new(
        log_type,
        tag,
        json!({
            "clanName": "Test Clan",
            "members": []
        }),
    )
}

pub fn member_feed(tag: &str) -> Feed {
    Feed::new(
        LogType::MemberLog,
        tag,
        json!({
            "event": "joined",
            "player": { "name": "Bob", "tag": "#PLAYER" }
        }),
    )
}
