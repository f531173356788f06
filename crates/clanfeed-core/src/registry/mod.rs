//! Log family registry
//!
//! The registry maps each [`LogType`] to the [`LogFamily`] that knows how to
//! deliver it, so the dispatcher never branches on the log type itself.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use clanfeed_core::registry::FamilyRegistry;
//!
//! let families = FamilyRegistry::with_builtin_families();
//! families.register(Arc::new(MyWarDigest));
//!
//! let family = families.get(LogType::LegendDigest)?;
//! let payload = family.render(&feed, &log)?;
//! ```

use crate::error::{Error, Result};
use crate::families;
use crate::model::LogType;
use crate::traits::LogFamily;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Registry of log families keyed by log type
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct FamilyRegistry {
    families: RwLock<HashMap<LogType, Arc<dyn LogFamily>>>,
}

impl FamilyRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every built-in family
    pub fn with_builtin_families() -> Self {
        let registry = Self::new();
        families::register_builtin(&registry);
        registry
    }

    /// Register a family, replacing any family already serving its log type
    pub fn register(&self, family: Arc<dyn LogFamily>) {
        let log_type = family.log_type();
        if self.write().insert(log_type, family).is_some() {
            tracing::debug!(%log_type, "Replaced log family");
        }
    }

    /// Get the family serving a log type
    pub fn get(&self, log_type: LogType) -> Result<Arc<dyn LogFamily>> {
        self.read()
            .get(&log_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("No log family registered for {}", log_type)))
    }

    /// Check if a log type has a family
    pub fn has(&self, log_type: LogType) -> bool {
        self.read().contains_key(&log_type)
    }

    /// Registered log types, sorted
    pub fn list(&self) -> Vec<LogType> {
        let mut types: Vec<LogType> = self.read().keys().copied().collect();
        types.sort();
        types
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<LogType, Arc<dyn LogFamily>>> {
        self.families.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<LogType, Arc<dyn LogFamily>>> {
        self.families.write().unwrap_or_else(|e| e.into_inner())
    }
}
