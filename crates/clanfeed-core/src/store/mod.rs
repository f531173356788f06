// # Log Store Implementations
//
// This module provides implementations of the LogStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::{FileLogStore, FileLogStoreFactory};
pub use memory::{MemoryLogStore, MemoryLogStoreFactory};

use std::collections::HashMap;

use crate::model::{LogConfig, LogId, normalize_tag};

/// Insert `config`, replacing any record holding the same unique triple
///
/// The entity tag is normalized first so `#abc` and `#ABC` are one key.
///
/// The stored id wins over the incoming one so callers keep addressing the
/// log by the id they already know.
pub(crate) fn upsert_into(logs: &mut HashMap<LogId, LogConfig>, mut config: LogConfig) -> LogConfig {
    config.entity_tag = normalize_tag(&config.entity_tag);
    let existing = logs
        .values()
        .find(|stored| stored.unique_key() == config.unique_key())
        .map(|stored| stored.id.clone());

    if let Some(id) = existing {
        config.id = id;
    }

    logs.insert(config.id.clone(), config.clone());
    config
}
