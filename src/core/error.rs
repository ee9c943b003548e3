//! Error types for the interop agent.

use thiserror::Error;

/// Result type alias for interop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Expected outcomes of intent resolution that are not defects.
///
/// Kept apart from [`Error`] so callers can match on them directly.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("No handler found for intent {intent}")]
    NoIntentHandler { intent: String },

    #[error("No handler for intent {intent} matched the specified target {target}")]
    TargetNotFound { intent: String, target: String },

    #[error("Multiple handlers ({count}) available for intent {intent} and no target given")]
    AmbiguousIntent { intent: String, count: usize },
}

/// Errors that can occur in interop operations.
#[derive(Error, Clone, Debug)]
pub enum Error {
    // Context errors
    #[error("Invalid context: {0}")]
    InvalidContext(String),

    // Channel errors
    #[error("Channel {channel} already associated with workspace {owner}")]
    ChannelConflict { channel: String, owner: String },

    #[error("Channel {channel} belongs to workspace {owner}; attempted access from workspace {requester}")]
    ChannelOwnershipViolation {
        channel: String,
        owner: String,
        requester: String,
    },

    // Intent errors
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    // Bridge errors
    #[error("Blocked request from untrusted origin: {0}")]
    UntrustedOrigin(String),

    #[error("Unsupported action {0}")]
    UnsupportedAction(String),

    #[error("Request {0} timed out")]
    RequestTimeout(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is an expected intent resolution outcome.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(self, Error::Resolution(_))
    }

    /// The resolution outcome, if this is one.
    pub fn as_resolution(&self) -> Option<&ResolutionError> {
        match self {
            Error::Resolution(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
