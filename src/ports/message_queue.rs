use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::message::Envelope;

/// Error type for queue transport operations
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Error when the queue service cannot be reached
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the queue service answers with a failure
    #[error("Queue service rejected {action} on {queue}: {message}")]
    Rejected {
        /// The operation that was attempted
        action: String,
        /// The queue it targeted
        queue: String,
        /// Error detail returned by the service
        message: String,
    },

    /// Error when a message cannot be encoded for sending
    #[error("Failed to encode message: {0}")]
    Encode(String),

    /// Error when the service returns a body that cannot be understood
    #[error("Invalid response from queue service: {0}")]
    InvalidResponse(String),

    /// Error when the target queue does not exist
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),
}

/// Result type alias for queue transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A message as read off a queue, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Identifier assigned by the queue service
    pub message_id: String,
    /// Opaque handle used to acknowledge this particular delivery
    pub receipt_handle: String,
    /// Message body as published
    pub body: String,
}

/// MessageQueue defines the port (interface) for the queue transport
#[async_trait]
pub trait MessageQueue: Send + Sync + 'static {
    /// Publish an envelope onto a work queue
    ///
    /// # Arguments
    /// * `queue` - The target queue (URL or name, depending on the adapter)
    /// * `envelope` - The event to publish
    async fn publish(&self, queue: &str, envelope: &Envelope) -> TransportResult<()>;

    /// Long-poll a queue for up to `max_messages` messages
    ///
    /// # Arguments
    /// * `queue` - The queue to read from
    /// * `max_messages` - Upper bound on the batch size
    /// * `wait` - How long to wait for at least one message before returning empty
    ///
    /// # Returns
    /// The received messages, possibly none
    async fn receive_batch(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
    ) -> TransportResult<Vec<RawMessage>>;

    /// Delete a received message so it is not delivered again
    async fn acknowledge(&self, queue: &str, message: &RawMessage) -> TransportResult<()>;
}
