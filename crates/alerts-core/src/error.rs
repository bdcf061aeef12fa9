//! Unified error types for events-alerts.

use thiserror::Error;

/// Result type alias using AlertsError.
pub type Result<T> = std::result::Result<T, AlertsError>;

#[derive(Error, Debug)]
pub enum AlertsError {
    // Event source errors (recoverable per cycle)
    #[error("Event source unavailable: {0}")]
    SourceUnavailable(String),

    // Channel errors (recoverable per event/channel)
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Channel not configured: {0}")]
    ChannelNotConfigured(String),

    // Fingerprint store errors
    #[error("Fingerprint store is corrupt: {0}")]
    StoreReadCorrupt(String),

    #[error("Fingerprint store write failed: {0}")]
    StoreWrite(String),

    // Config errors (fatal at startup)
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl AlertsError {
    pub fn source(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    pub fn store_write(msg: impl Into<String>) -> Self {
        Self::StoreWrite(msg.into())
    }

    /// True for errors that must stop the process before the loop starts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigInvalid(_) | Self::ConfigNotFound(_))
    }
}
