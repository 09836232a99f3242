//! Erizo error types.
//!
//! Every command failure is classified into one of five kinds (malformed,
//! precondition, engine rejection, resource exhaustion, internal). Error codes
//! and client messages are what correlated callers see in an error
//! acknowledgement; internal details are logged server-side only.

use crate::engine::EngineError;
use thiserror::Error;

/// Erizo orchestration error type.
///
/// Maps to acknowledgement error codes:
/// - Malformed / unknown method: `BAD_REQUEST` (1)
/// - Missing publisher or stream: `NOT_FOUND` (4)
/// - Duplicate publish, subscription or bridge id, upstream not ready: `CONFLICT` (5)
/// - Bus, Internal, closed endpoint: `INTERNAL_ERROR` (6)
/// - No worker or engine capacity: `UNAVAILABLE` (7)
/// - Engine rejected SDP or candidate: `REJECTED` (8)
#[derive(Debug, Error)]
pub enum ErizoError {
    /// Command payload is missing fields or has mistyped arguments.
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    /// Command names a method this erizo does not implement.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// A publisher or bridge source already serves this stream id.
    #[error("Stream already published: {0}")]
    StreamAlreadyPublished(String),

    /// No publisher or bridge source serves this stream id.
    #[error("No publisher for stream: {0}")]
    PublisherNotFound(String),

    /// Upstream exists but cannot accept subscribers yet.
    #[error("Publisher not ready: {0}")]
    PublisherNotReady(String),

    /// The client already subscribes to this stream.
    #[error("Already subscribed: {0}")]
    AlreadySubscribed(String),

    /// No endpoint exists for the (client, stream) pair.
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Bridge-stream id is already registered.
    #[error("Bridge stream in use: {0}")]
    BridgeInUse(String),

    /// The media engine refused an SDP, candidate or attachment.
    #[error("Engine rejected operation: {0}")]
    EngineRejected(String),

    /// Worker pool or engine has no capacity for a new endpoint.
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// The endpoint actor has already shut down.
    #[error("Endpoint closed")]
    EndpointClosed,

    /// Message bus operation failed.
    #[error("Message bus error: {0}")]
    Bus(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure classification used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Malformed,
    Precondition,
    EngineRejection,
    ResourceExhaustion,
    Internal,
}

impl ErrorKind {
    /// Label value for metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Malformed => "malformed",
            ErrorKind::Precondition => "precondition",
            ErrorKind::EngineRejection => "engine_rejected",
            ErrorKind::ResourceExhaustion => "resource_exhausted",
            ErrorKind::Internal => "internal",
        }
    }
}

impl ErizoError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ErizoError::MalformedCommand(_) | ErizoError::UnknownMethod(_) => ErrorKind::Malformed,
            ErizoError::StreamAlreadyPublished(_)
            | ErizoError::PublisherNotFound(_)
            | ErizoError::PublisherNotReady(_)
            | ErizoError::AlreadySubscribed(_)
            | ErizoError::StreamNotFound(_)
            | ErizoError::BridgeInUse(_) => ErrorKind::Precondition,
            ErizoError::EngineRejected(_) => ErrorKind::EngineRejection,
            ErizoError::ResourceUnavailable(_) => ErrorKind::ResourceExhaustion,
            ErizoError::EndpointClosed
            | ErizoError::Bus(_)
            | ErizoError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the acknowledgement error code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            ErizoError::MalformedCommand(_) | ErizoError::UnknownMethod(_) => 1, // BAD_REQUEST
            ErizoError::PublisherNotFound(_) | ErizoError::StreamNotFound(_) => 4, // NOT_FOUND
            ErizoError::StreamAlreadyPublished(_)
            | ErizoError::PublisherNotReady(_)
            | ErizoError::AlreadySubscribed(_)
            | ErizoError::BridgeInUse(_) => 5, // CONFLICT
            ErizoError::EndpointClosed
            | ErizoError::Bus(_)
            | ErizoError::Internal(_) => 6, // INTERNAL_ERROR
            ErizoError::ResourceUnavailable(_) => 7, // UNAVAILABLE
            ErizoError::EngineRejected(_) => 8,      // REJECTED
        }
    }

    /// Returns a caller-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            ErizoError::MalformedCommand(msg) => format!("Malformed command: {msg}"),
            ErizoError::UnknownMethod(method) => format!("Unknown method: {method}"),
            ErizoError::StreamAlreadyPublished(_) => "Stream is already published".to_string(),
            ErizoError::PublisherNotFound(_) => "No publisher for stream".to_string(),
            ErizoError::PublisherNotReady(_) => "Publisher is not ready".to_string(),
            ErizoError::AlreadySubscribed(_) => "Already subscribed to stream".to_string(),
            ErizoError::StreamNotFound(_) => "Stream not found".to_string(),
            ErizoError::BridgeInUse(_) => "Bridge stream id is already in use".to_string(),
            ErizoError::EngineRejected(_) => "Media engine rejected the request".to_string(),
            ErizoError::ResourceUnavailable(_) => {
                "No media capacity available, please try again".to_string()
            }
            ErizoError::EndpointClosed
            | ErizoError::Bus(_)
            | ErizoError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<EngineError> for ErizoError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Rejected(msg) => ErizoError::EngineRejected(msg),
            EngineError::Unavailable(msg) => ErizoError::ResourceUnavailable(msg),
        }
    }
}
