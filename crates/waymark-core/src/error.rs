//! Error types for waymark-core.
//!
//! Nothing in the delivery pipeline is fatal to the process: transport
//! failures are recorded into sample status fields, storage failures
//! are logged and swallowed, and validation failures surface as boolean
//! returns at the session boundary. These error types cover the
//! operations that do propagate a result to the caller.

use thiserror::Error;

/// Errors that can occur in the Waymark pipeline.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error
/// variants in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Operation requires an active session.
    #[error("Not logged in")]
    NotLoggedIn,

    /// Invalid base URL for the ingestion service.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// HTTP request failed at the transport level.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Persistent channel operation failed.
    #[error("Channel error: {0}")]
    Channel(String),

    /// Channel operation attempted while not connected.
    #[error("Channel not connected")]
    ChannelNotConnected,

    /// Outbound payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sample store error.
    #[error("Store error: {0}")]
    Store(#[from] waymark_store::Error),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create an API error from a response status and body.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a channel error.
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

impl From<rumqttc::ClientError> for Error {
    fn from(err: rumqttc::ClientError) -> Self {
        Error::Channel(err.to_string())
    }
}

/// Result type alias using waymark-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
