// # clanfeed-core
//
// Core library for the clanfeed log notification engine.
//
// ## Architecture Overview
//
// This library turns game events and periodic snapshots into chat messages:
// - **LogStore**: Trait for the persistent source of truth of registered logs
// - **Transport**: Trait for the outbound send/edit delivery calls
// - **ChannelDirectory**: Trait for resolving channels and their permissions
// - **LogFamily**: Per-log-type capability (permissions, period, renderer)
// - **LogRegistry**: In-memory cache of live logs, write-through to the store
// - **DispatchCore**: Matches logs, renders, decides send vs edit, applies the failure policy
// - **Scheduler**: Self-re-arming loop that drives pull-style log families
//
// ## Design Principles
//
// 1. **Single owner per concern**: Transports never retry, stores never decide
// 2. **Per-entry isolation**: One failing log never blocks the other logs of a fan-out
// 3. **At most one in flight**: A log id is never dispatched twice concurrently
// 4. **Library-first**: The daemon is a thin wiring layer over this crate

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod families;
pub mod model;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use cache::{CacheEntry, LogRegistry, Scope};
pub use config::{DispatchConfig, EngineConfig, SchedulerConfig, StoreConfig, TransportConfig};
pub use dispatch::{DispatchCore, DispatchEvent, ExecReport, Outcome};
pub use error::{Error, Result};
pub use model::{
    ChannelId, DeliveryTarget, Feed, GuildId, LogConfig, LogId, LogType, MessageId, Period,
    Permission, RouteKey,
};
pub use registry::FamilyRegistry;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use store::{FileLogStore, MemoryLogStore};
pub use traits::{ChannelDirectory, LogFamily, LogStore, SnapshotSource, Transport};
