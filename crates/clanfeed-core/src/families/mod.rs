//! Built-in log families
//!
//! Plain renderers for the log types the engine ships with. Deployments that
//! want richer messages register their own [`LogFamily`] for the same log type,
//! replacing the built-in one.

mod digests;
mod events;

pub use digests::{
    CapitalDigestFamily, ClanGamesDigestFamily, LastSeenDigestFamily, LegendDigestFamily,
};
pub use events::{DonationLogFamily, MemberLogFamily};

use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::model::{Feed, LogType, Permission};
use crate::registry::FamilyRegistry;
use crate::traits::{LogFamily, RenderError};

/// Permissions every family needs to post an embed
pub(crate) const POST_EMBEDS: &[Permission] = &[
    Permission::ViewChannel,
    Permission::SendMessages,
    Permission::EmbedLinks,
];

/// Permissions a digest needs to keep editing its message
pub(crate) const EDIT_EMBEDS: &[Permission] = &[
    Permission::ViewChannel,
    Permission::SendMessages,
    Permission::EmbedLinks,
    Permission::ReadMessageHistory,
];

/// Register every built-in family
pub fn register_builtin(registry: &FamilyRegistry) {
    let families: [Arc<dyn LogFamily>; 6] = [
        Arc::new(MemberLogFamily),
        Arc::new(DonationLogFamily),
        Arc::new(LegendDigestFamily),
        Arc::new(ClanGamesDigestFamily),
        Arc::new(CapitalDigestFamily),
        Arc::new(LastSeenDigestFamily),
    ];
    for family in families {
        registry.register(family);
    }
}

/// Deserialize a feed payload into the family's expected shape
pub(crate) fn parse_payload<T: DeserializeOwned>(
    feed: &Feed,
    log_type: LogType,
) -> Result<T, RenderError> {
    serde_json::from_value(feed.payload.clone())
        .map_err(|e| RenderError::malformed(log_type, e.to_string()))
}
