// # Snapshot Source Trait
//
// Pull-style log families have no upstream event. Their scheduler asks a
// snapshot source for the current state of the tracked entity and feeds the
// result into the dispatcher.
//
// ## Implementations
//
// - HTTP: `clanfeed-source-http` crate

use async_trait::async_trait;

use crate::model::{Feed, LogConfig};

/// Trait for snapshot source implementations
///
/// Like transports, sources are single-shot: one fetch per call, no retries.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the current snapshot for a log
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Feed))`: Snapshot to dispatch
    /// - `Ok(None)`: Nothing to post right now (entity unknown or no data)
    /// - `Err(Error)`: Fetch failed; the scheduler skips the log for this tick
    async fn fetch(&self, log: &LogConfig) -> Result<Option<Feed>, crate::Error>;

    /// Source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}

/// Helper trait for constructing snapshot sources from configuration
pub trait SnapshotSourceFactory: Send + Sync {
    fn create(
        &self,
        config: &crate::config::SourceConfig,
    ) -> Result<Box<dyn SnapshotSource>, crate::Error>;
}
