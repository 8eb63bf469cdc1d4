//! Conduit - an API gateway that bridges synchronous HTTP onto message queues.
//!
//! An HTTP request becomes an event published to a domain work queue
//! (`users`, `orders`, ...). The gateway then waits for the worker's reply on
//! a shared response queue and turns it back into an HTTP response. Replies
//! are paired with their callers by correlation id.
//!
//! # Architecture
//! The crate follows a hexagonal layout:
//! - `core` holds the correlation registry, the request publisher, the
//!   response pump and the [`Bridge`](core::Bridge) that ties them together.
//! - `ports` defines the [`MessageQueue`](ports::MessageQueue) trait the core
//!   depends on.
//! - `adapters` implements it (in-memory and SQS) and exposes the REST
//!   surface built on axum.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use conduit::{Bridge, InMemoryQueue, config::GatewayConfig};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let mut config = GatewayConfig::default();
//! config.queues.response_queue = "responses".into();
//! config.queues.domains.insert("orders".into(), "orders".into());
//!
//! let bridge = Bridge::new(&config, Arc::new(InMemoryQueue::new()));
//! bridge.start().await;
//! let reply = bridge
//!     .send("orders", "ORDER_GET", serde_json::json!({ "id": "42" }))
//!     .await;
//! println!("{reply:?}");
//! bridge.shutdown().await;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Request outcomes are `Result<serde_json::Value, FailureKind>`; every
//! failure a caller can see is one [`FailureKind`](core::FailureKind)
//! variant. Application plumbing (config, startup) returns `eyre::Result<T>`
//! with `WrapErr` context attached.
//!
//! # Concurrency & Data Structures
//! Pending requests live in an `scc::HashMap`. Removing an entry is the only
//! way to settle it, so a reply, a timeout and a shutdown can race without
//! a request ever being settled twice.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{InMemoryQueue, SqsQueue},
    core::{Bridge, CorrelationId, CorrelationRegistry, FailureKind},
    ports::MessageQueue,
    utils::GracefulShutdown,
};
