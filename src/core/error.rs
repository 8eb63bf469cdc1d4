use std::time::Duration;

use thiserror::Error;

use crate::core::message::CorrelationId;

/// Why a request did not produce a result payload.
///
/// This is what a waiting caller receives. The REST layer maps each kind to
/// an HTTP status code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FailureKind {
    /// The transport rejected the outbound send; nothing left the gateway.
    #[error("Failed to publish request: {0}")]
    PublishFailed(String),

    /// No response arrived before the deadline. The operation may or may
    /// not have completed downstream.
    #[error("Request timeout - no response received within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The worker replied with `success: false`.
    #[error("{0}")]
    RemoteFailure(String),

    /// The bridge was shut down while the request was pending.
    #[error("Request cancelled - gateway is shutting down")]
    Cancelled,

    /// No work queue is configured for the requested domain.
    #[error("No work queue configured for domain '{0}'")]
    UnknownDomain(String),

    /// The registry refused to track the request.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Errors returned when registering a pending request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Correlation id {0} is already pending")]
    DuplicateCorrelationId(CorrelationId),

    #[error("Correlation registry has been shut down")]
    ShutDown,
}

impl From<RegistryError> for FailureKind {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ShutDown => FailureKind::Cancelled,
            other => FailureKind::Rejected(other.to_string()),
        }
    }
}

/// A response-queue message that could not be decoded.
///
/// Such a message cannot be attributed to any caller, so it is only logged
/// and discarded by the pump.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("Malformed response body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Response is missing a correlation id")]
    MissingCorrelationId,
}
