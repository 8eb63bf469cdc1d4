pub mod memory_queue;
pub mod rest;
pub mod sqs;

/// Re-export commonly used types from adapters
pub use memory_queue::InMemoryQueue;
pub use rest::router;
pub use sqs::SqsQueue;
