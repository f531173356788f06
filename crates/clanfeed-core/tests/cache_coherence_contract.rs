//! Contract Test: Cache / Store Coherence
//!
//! The log cache mirrors the store. Message and retry state is written to
//! the cache first and to the store best-effort afterwards.
//!
//! Constraints verified:
//! - After `add`, a cached log equals its stored record
//! - A failing store write does not fail the dispatch; the cache keeps the newer state
//! - Re-initializing reloads the store's view
//! - `shutdown` empties the cache and flushes the store

mod common;

use async_trait::async_trait;
use clanfeed_core::model::{LogConfig, LogId, LogType, RouteKey};
use clanfeed_core::traits::{DeliveryState, LogFilter, LogStore, StaticChannelDirectory};
use clanfeed_core::{Error, LogRegistry, MemoryLogStore, Scope};
use common::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A memory store whose delivery writes can be made to fail
struct FlakyStore {
    inner: MemoryLogStore,
    fail_writes: AtomicBool,
    flush_count: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: MemoryLogStore) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            flush_count: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LogStore for FlakyStore {
    async fn find(&self, filter: &LogFilter) -> clanfeed_core::Result<Vec<LogConfig>> {
        self.inner.find(filter).await
    }

    async fn get(&self, id: &LogId) -> clanfeed_core::Result<Option<LogConfig>> {
        self.inner.get(id).await
    }

    async fn upsert(&self, config: LogConfig) -> clanfeed_core::Result<LogConfig> {
        self.inner.upsert(config).await
    }

    async fn update_delivery(&self, id: &LogId, state: &DeliveryState) -> clanfeed_core::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::store("disk full"));
        }
        self.inner.update_delivery(id, state).await
    }

    async fn set_enabled(&self, id: &LogId, enabled: bool) -> clanfeed_core::Result<()> {
        self.inner.set_enabled(id, enabled).await
    }

    async fn delete(&self, id: &LogId) -> clanfeed_core::Result<()> {
        self.inner.delete(id).await
    }

    async fn flush(&self) -> clanfeed_core::Result<()> {
        self.flush_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn added_log_equals_stored_record() {
    let h = Harness::new(vec![]).await;
    let config = log("7", 2, "#AAA", LogType::CapitalDigest).with_color(0xff0000);
    h.store.upsert(config).await.unwrap();

    assert_eq!(h.registry.add(&Scope::Log(LogId::from("7"))).await.unwrap(), 1);

    let cached = h.registry.get(&LogId::from("7")).unwrap();
    assert_eq!(cached.config, h.stored("7").await);
    assert!(!cached.deleted);
}

#[tokio::test]
async fn delivery_state_matches_store_after_dispatch() {
    let h = Harness::new(vec![legend_log("1", 1, "#AAA", 2)]).await;

    h.dispatch
        .exec(&RouteKey::log("1"), &digest_feed(LogType::LegendDigest, "#AAA"))
        .await;

    let cached = h.registry.get(&LogId::from("1")).unwrap();
    assert_eq!(cached.config, h.stored("1").await);
}

#[tokio::test]
async fn failed_store_write_keeps_cache_authoritative() {
    let memory = MemoryLogStore::new();
    memory.upsert(legend_log("1", 1, "#AAA", 2)).await.unwrap();
    let store = Arc::new(FlakyStore::new(memory.clone()));
    let directory = Arc::new(StaticChannelDirectory::permissive(MANAGED));
    let registry = Arc::new(LogRegistry::new(store.clone(), directory));
    registry.init(&LogType::ALL).await.unwrap();

    store.fail_writes.store(true, Ordering::SeqCst);
    let id = LogId::from("1");
    let message = clanfeed_core::MessageId::new("m1");
    let updated = registry
        .record_success(&id, message.clone(), chrono::Utc::now())
        .await;

    assert!(updated.is_some(), "store failure does not fail the update");
    assert_eq!(registry.get(&id).unwrap().config.message_id, Some(message));
    assert!(memory.get(&id).await.unwrap().unwrap().message_id.is_none());

    // A restart reloads what the store has
    registry.init(&LogType::ALL).await.unwrap();
    assert!(registry.get(&id).unwrap().config.message_id.is_none());

    registry.shutdown().await.unwrap();
    assert!(registry.is_empty());
    assert_eq!(store.flush_count.load(Ordering::SeqCst), 1);
}
