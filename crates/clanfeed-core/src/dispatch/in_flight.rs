// # In-Flight Set
//
// Ids of the logs currently being dispatched. Acquiring an id is a single
// atomic insert; a second attempt for the same id fails instead of waiting.
// The id is released when the returned guard drops, so an early return or
// a panic inside the dispatch cannot leak it.

use dashmap::DashSet;
use std::sync::Arc;

use crate::model::LogId;

#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    ids: Arc<DashSet<LogId>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` in flight, or `None` if it already is
    pub fn try_acquire(&self, id: &LogId) -> Option<InFlightGuard> {
        if self.ids.insert(id.clone()) {
            Some(InFlightGuard {
                ids: Arc::clone(&self.ids),
                id: id.clone(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, id: &LogId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Releases its id on drop
#[derive(Debug)]
pub struct InFlightGuard {
    ids: Arc<DashSet<LogId>>,
    id: LogId,
}

impl InFlightGuard {
    pub fn id(&self) -> &LogId {
        &self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids.remove(&self.id);
    }
}
