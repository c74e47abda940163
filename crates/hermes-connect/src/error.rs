//! Error types for hermes-connect

use thiserror::Error;

/// Connector error type
#[derive(Debug, Error)]
pub enum Error {
    /// Required configuration is absent
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    /// Connecting to the broker failed
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// An operation needed a live broker connection and there was none
    #[error("broker not connected")]
    NotConnected,

    /// A subscription pass was requested with an empty topic set
    #[error("no subscription topics configured")]
    NoTopicsConfigured,

    /// Subscribing to a topic failed
    #[error("subscribe to '{topic}' failed: {reason}")]
    Subscribe {
        /// Topic that could not be subscribed
        topic: String,
        /// Broker-reported reason
        reason: String,
    },

    /// Publishing to a topic failed
    #[error("publish to '{topic}' failed: {reason}")]
    Publish {
        /// Topic the event was addressed to
        topic: String,
        /// Broker-reported reason
        reason: String,
    },

    /// A registry request could not be completed
    #[error("registry request failed: {0}")]
    Registry(String),

    /// The registry answered with a non-success status
    #[error("registry returned status {status}: {body}")]
    RegistryStatus {
        /// HTTP status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// An event payload could not be encoded or decoded
    #[error("event decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// Start was called on a source that is already running
    #[error("event source already started")]
    AlreadyStarted,
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Registry(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
