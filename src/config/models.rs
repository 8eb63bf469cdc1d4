//! Configuration data structures for Conduit.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! to `CONDUIT__*` environment variables. Every section has defaults so that a
//! minimal config only needs the queue targets.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Prefix for the resource routes (`/api/users`, `/api/orders`).
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub pump: PumpConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_prefix: default_api_prefix(),
            queues: QueueConfig::default(),
            transport: TransportConfig::default(),
            pump: PumpConfig::default(),
            request: RequestConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Queue targets. With the SQS transport these are queue URLs.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct QueueConfig {
    /// Shared queue every worker replies on.
    pub response_queue: String,
    /// Work queue per domain, e.g. `users` and `orders`.
    pub domains: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Process-local queues; nothing leaves the gateway.
    #[default]
    Memory,
    /// SQS JSON protocol over HTTP(S).
    Sqs,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Service root for the SQS transport (e.g. `http://localhost:9324`).
    pub endpoint: Option<String>,
    /// Timeout for individual HTTP calls, on top of any long-poll wait.
    pub http_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Memory,
            endpoint: None,
            http_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PumpConfig {
    /// Messages requested per long-poll (SQS allows at most 10).
    pub max_messages: usize,
    /// Long-poll wait in seconds (SQS allows at most 20).
    pub wait_time_secs: u64,
    /// Pause after a failed poll before trying again.
    pub error_backoff_secs: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time_secs: 20,
            error_backoff_secs: 5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RequestConfig {
    /// How long a caller waits for a worker's reply.
    pub timeout_ms: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// JSON lines when true, human-readable output otherwise.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}
