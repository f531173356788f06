//! Core traits for the clanfeed engine
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`LogStore`]: Persistent source of truth for registered logs
//! - [`Transport`]: Outbound send/edit delivery calls
//! - [`ChannelDirectory`]: Channel resolution and permissions (delivery preconditions)
//! - [`LogFamily`]: Per-log-type capability (permissions, period, renderer)
//! - [`SnapshotSource`]: Snapshot fetching for pull-style log families

pub mod directory;
pub mod family;
pub mod log_store;
pub mod snapshot;
pub mod transport;

pub use directory::{ChannelDirectory, ChannelInfo, StaticChannelDirectory};
pub use family::{LogFamily, RenderError};
pub use log_store::{DeliveryState, LogFilter, LogStore, LogStoreFactory};
pub use snapshot::{SnapshotSource, SnapshotSourceFactory};
pub use transport::{
    DeliveryError, DeliveryErrorKind, DeliveryRequest, FailureSeverity, Transport,
    TransportFactory,
};
