// # Transport Trait
//
// Defines the interface for delivering rendered messages to a chat channel.
//
// ## Implementations
//
// - Webhooks: `clanfeed-webhook` crate
//
// ## Usage
//
// ```rust,ignore
// use clanfeed_core::traits::{DeliveryRequest, Transport};
//
// let request = DeliveryRequest::from_config(&log);
// let message_id = transport.send(&request, &payload).await?;
// transport.edit(&request, &message_id, &payload).await?;
// ```

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::model::{ChannelId, DeliveryTarget, LogConfig, MessageId, MessagePayload};

/// Where a single delivery goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub target: DeliveryTarget,
    pub channel_id: ChannelId,
    pub thread_id: Option<ChannelId>,
}

impl DeliveryRequest {
    pub fn from_config(config: &LogConfig) -> Self {
        Self {
            target: config.delivery_target.clone(),
            channel_id: config.channel_id,
            thread_id: config.thread_id,
        }
    }
}

/// Classified delivery failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// Credentials rejected
    Unauthorized,
    /// Credentials valid but not allowed to post here
    Forbidden,
    /// Target (webhook, channel) no longer exists
    NotFound,
    /// The message addressed by an edit no longer exists
    MessageNotFound,
    /// Provider asked us to slow down
    RateLimited { retry_after: Option<Duration> },
    /// No response in time
    Timeout,
    /// Anything else
    Unknown,
}

/// How the dispatch failure policy treats a delivery failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSeverity {
    /// Evict the log and disable it
    Permanent,
    /// Count a retry, keep the log
    Transient,
    /// Forget the message id and post a new message
    MessageGone,
}

impl DeliveryErrorKind {
    pub fn severity(&self) -> FailureSeverity {
        match self {
            DeliveryErrorKind::Unauthorized
            | DeliveryErrorKind::Forbidden
            | DeliveryErrorKind::NotFound => FailureSeverity::Permanent,
            DeliveryErrorKind::MessageNotFound => FailureSeverity::MessageGone,
            DeliveryErrorKind::RateLimited { .. }
            | DeliveryErrorKind::Timeout
            | DeliveryErrorKind::Unknown => FailureSeverity::Transient,
        }
    }
}

impl fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryErrorKind::Unauthorized => f.write_str("unauthorized"),
            DeliveryErrorKind::Forbidden => f.write_str("forbidden"),
            DeliveryErrorKind::NotFound => f.write_str("not found"),
            DeliveryErrorKind::MessageNotFound => f.write_str("message not found"),
            DeliveryErrorKind::RateLimited { retry_after: Some(after) } => {
                write!(f, "rate limited (retry after {:?})", after)
            }
            DeliveryErrorKind::RateLimited { retry_after: None } => f.write_str("rate limited"),
            DeliveryErrorKind::Timeout => f.write_str("timeout"),
            DeliveryErrorKind::Unknown => f.write_str("unknown"),
        }
    }
}

/// Failure returned by a [`Transport`], already classified
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub message: String,
}

impl DeliveryError {
    pub fn new(kind: DeliveryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::NotFound, message)
    }

    pub fn message_not_found(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::MessageNotFound, message)
    }

    pub fn rate_limited(retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::RateLimited { retry_after }, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::Timeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::Unknown, message)
    }

    pub fn severity(&self) -> FailureSeverity {
        self.kind.severity()
    }
}

/// Trait for transport implementations
///
/// A transport performs exactly one outbound call per invocation and reports
/// the outcome. It may cache a connection handle per delivery target, but it
/// must rebuild that handle when the target's credentials change.
///
/// # Forbidden
///
/// - Retrying or sleeping (retry policy is owned by `DispatchCore`)
/// - Touching the log store or the log registry
/// - Deciding between send and edit
#[async_trait]
pub trait Transport: Send + Sync {
    /// Post a new message and return its id
    async fn send(
        &self,
        request: &DeliveryRequest,
        payload: &MessagePayload,
    ) -> Result<MessageId, DeliveryError>;

    /// Replace the body of a previously posted message
    async fn edit(
        &self,
        request: &DeliveryRequest,
        message_id: &MessageId,
        payload: &MessagePayload,
    ) -> Result<(), DeliveryError>;

    /// Transport name (for logging/debugging)
    fn transport_name(&self) -> &'static str;
}

/// Helper trait for constructing transports from configuration
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        config: &crate::config::TransportConfig,
    ) -> Result<Box<dyn Transport>, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classification() {
        assert_eq!(DeliveryError::unauthorized("x").severity(), FailureSeverity::Permanent);
        assert_eq!(DeliveryError::forbidden("x").severity(), FailureSeverity::Permanent);
        assert_eq!(DeliveryError::not_found("x").severity(), FailureSeverity::Permanent);
        assert_eq!(
            DeliveryError::message_not_found("x").severity(),
            FailureSeverity::MessageGone
        );
        assert_eq!(
            DeliveryError::rate_limited(Some(Duration::from_secs(2)), "x").severity(),
            FailureSeverity::Transient
        );
        assert_eq!(DeliveryError::timeout("x").severity(), FailureSeverity::Transient);
        assert_eq!(DeliveryError::unknown("x").severity(), FailureSeverity::Transient);
    }

    #[test]
    fn test_display_includes_kind() {
        let err = DeliveryError::rate_limited(None, "slow down");
        assert_eq!(err.to_string(), "rate limited: slow down");
    }
}
