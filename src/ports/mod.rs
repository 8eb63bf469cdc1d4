pub mod message_queue;

pub use message_queue::{MessageQueue, RawMessage, TransportError, TransportResult};
