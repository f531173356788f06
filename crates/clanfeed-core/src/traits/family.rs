// # Log Family Trait
//
// One implementation per log type. A family tells the dispatcher which
// channel permissions it needs, how long a posted message stays editable,
// and how to turn a feed into a message body.

use crate::model::{Feed, LogConfig, LogType, MessagePayload, Period, Permission};

/// Renderer failure; aborts processing for the one affected log
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The feed payload does not have the shape this family expects
    #[error("malformed feed for {log_type}: {reason}")]
    MalformedFeed { log_type: LogType, reason: String },

    /// The feed is well-formed but cannot be rendered for this log
    #[error("unsupported feed: {0}")]
    Unsupported(String),
}

impl RenderError {
    pub fn malformed(log_type: LogType, reason: impl Into<String>) -> Self {
        Self::MalformedFeed {
            log_type,
            reason: reason.into(),
        }
    }
}

impl From<RenderError> for crate::Error {
    fn from(err: RenderError) -> Self {
        crate::Error::render(err.to_string())
    }
}

/// Capability interface of a log family
///
/// Renderers must be pure: no I/O, no shared state, same feed in, same
/// payload out.
pub trait LogFamily: Send + Sync {
    /// The log type this family serves
    fn log_type(&self) -> LogType;

    /// Name of the store collection this family's logs are kept in
    fn collection_name(&self) -> &'static str;

    /// Channel permissions required before delivering
    fn required_permissions(&self) -> &'static [Permission];

    /// Rollover cadence deciding between send and edit
    fn period(&self) -> Period;

    /// Render the feed for one log
    fn render(&self, feed: &Feed, log: &LogConfig) -> Result<MessagePayload, RenderError>;
}
