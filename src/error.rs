//! Error types for pushgate.

use thiserror::Error;

/// Marker text that delivery backends use for tokens the provider no longer
/// recognizes.
pub const UNREGISTERED_MARKER: &str = "Unregistered";

/// Main error type for pushgate operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading or parsing error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration loaded but holds an unusable value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Request rejected before dispatch.
    #[error("{0}")]
    Validation(String),

    /// Worker backlog or broker is at capacity.
    #[error("max capacity reached")]
    QueueFull,

    /// Queue no longer accepts work.
    #[error("queue is shut down")]
    QueueClosed,

    /// Broker-specific rejection.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Delivery backend error.
    #[error("{0}")]
    Delivery(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Metrics registration error.
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// Returns true if the error reports a device token the provider has
    /// dropped. Backends only signal this through the message text.
    #[must_use]
    pub fn is_unregistered(&self) -> bool {
        self.to_string().contains(UNREGISTERED_MARKER)
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
