//! Error types for the clanfeed engine
//!
//! This module defines the crate-wide error type. Delivery failures returned
//! by a [`Transport`](crate::traits::Transport) have their own classified type,
//! [`DeliveryError`](crate::traits::DeliveryError), and renderer failures use
//! [`RenderError`](crate::traits::RenderError).

use thiserror::Error;

/// Result type alias for clanfeed operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the clanfeed engine
#[derive(Error, Debug)]
pub enum Error {
    /// Log store errors
    #[error("Log store error: {0}")]
    Store(String),

    /// Transport errors that escaped classification
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration errors, including invalid delivery targets at registration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Renderer errors
    #[error("Render error: {0}")]
    Render(String),

    /// Snapshot source errors
    #[error("Snapshot source error: {0}")]
    Source(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a log store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a render error
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Create a snapshot source error
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error rejects a registration outright
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
