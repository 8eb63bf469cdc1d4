//! Wire types exchanged with the work queues and the response queue.
//!
//! Outbound events are [`Envelope`]s published to a domain's work queue.
//! Inbound replies are [`ResponseMessage`]s read from the shared response
//! queue. Replies come from outside the gateway and are treated as untrusted:
//! [`ResponseMessage::decode`] never panics and reports a [`DecodeError`]
//! instead.
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::{DecodeError, FailureKind};

/// Message used when a worker reports failure without an explanation.
pub const DEFAULT_REMOTE_FAILURE: &str = "Operation failed";

/// Token linking an outbound request to its eventual inbound response.
///
/// Fresh ids are random (UUID v4). Any string can be wrapped so ids read
/// off the wire round-trip without loss, even when they were not produced
/// by this gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new random correlation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

/// Event published to a domain work queue. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    correlation_id: CorrelationId,
    data: serde_json::Value,
    timestamp: String,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(
        event_type: impl Into<String>,
        correlation_id: CorrelationId,
        data: serde_json::Value,
    ) -> Self {
        Self::with_timestamp(event_type, correlation_id, data, Utc::now())
    }

    /// Build an envelope with an explicit timestamp.
    pub fn with_timestamp(
        event_type: impl Into<String>,
        correlation_id: CorrelationId,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            correlation_id,
            data,
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// ISO 8601 timestamp of when the envelope was built.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Serialize to the JSON body placed on the queue.
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Reply published by a worker onto the response queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    pub correlation_id: CorrelationId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ResponseMessage {
    /// Decode a raw queue body.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        let message: Self = serde_json::from_str(body)?;
        if message.correlation_id.as_str().is_empty() {
            return Err(DecodeError::MissingCorrelationId);
        }
        Ok(message)
    }

    /// Convert the reply into the outcome delivered to the waiting caller.
    pub fn into_outcome(self) -> Result<serde_json::Value, FailureKind> {
        if self.success {
            Ok(self.data.unwrap_or(serde_json::Value::Null))
        } else {
            Err(FailureKind::RemoteFailure(
                self.error_message
                    .unwrap_or_else(|| DEFAULT_REMOTE_FAILURE.to_string()),
            ))
        }
    }
}
