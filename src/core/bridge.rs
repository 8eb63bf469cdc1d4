//! Bridge façade tying the registry, the publisher and the response pump
//! together under one start/stop lifecycle.
use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    config::GatewayConfig,
    core::{
        message::CorrelationId,
        publisher::RequestPublisher,
        pump::{PumpHandle, PumpSettings, PumpState, ResponsePump},
        registry::{CorrelationRegistry, Outcome, RegistryStats},
    },
    ports::message_queue::MessageQueue,
};

/// Snapshot reported by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub pump: PumpState,
    pub registry: RegistryStats,
    pub response_queue: String,
    pub domains: Vec<String>,
}

/// Request/response correlation bridge for one gateway process.
pub struct Bridge {
    registry: CorrelationRegistry,
    publisher: RequestPublisher,
    queue: Arc<dyn MessageQueue>,
    pump_settings: PumpSettings,
    default_timeout: Duration,
    pump: Mutex<Option<PumpHandle>>,
    cancel: CancellationToken,
}

impl Bridge {
    pub fn new(config: &GatewayConfig, queue: Arc<dyn MessageQueue>) -> Self {
        let registry = CorrelationRegistry::new();
        let publisher =
            RequestPublisher::new(registry.clone(), queue.clone(), config.queues.domains.clone());

        Self {
            registry,
            publisher,
            queue,
            pump_settings: PumpSettings::from_config(config),
            default_timeout: Duration::from_millis(config.request.timeout_ms),
            pump: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the response pump. Calling this twice is a no-op.
    pub async fn start(&self) {
        let mut pump = self.pump.lock().await;
        if pump.is_some() {
            tracing::warn!("Response pump already running");
            return;
        }
        let worker = ResponsePump::new(
            self.registry.clone(),
            self.queue.clone(),
            self.pump_settings.clone(),
        );
        *pump = Some(worker.spawn(self.cancel.child_token()));
    }

    /// Stop the pump and cancel every pending request.
    ///
    /// Already-published messages are not recalled from the work queues.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down correlation bridge");
        self.cancel.cancel();
        if let Some(handle) = self.pump.lock().await.take() {
            handle.stop().await;
        }
        self.registry.shutdown().await;
    }

    /// Publish to `domain` and wait for the reply, using the configured
    /// default timeout.
    pub async fn send(&self, domain: &str, event_type: &str, payload: serde_json::Value) -> Outcome {
        self.publisher
            .send(domain, event_type, payload, self.default_timeout)
            .await
    }

    /// Publish under a caller-chosen correlation id and wait for the reply.
    pub async fn send_correlated(
        &self,
        correlation_id: CorrelationId,
        domain: &str,
        event_type: &str,
        payload: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Outcome {
        self.publisher
            .send_correlated(
                correlation_id,
                domain,
                event_type,
                payload,
                timeout.unwrap_or(self.default_timeout),
            )
            .await
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    pub async fn status(&self) -> BridgeStatus {
        let pump = match self.pump.lock().await.as_ref() {
            Some(handle) => handle.state(),
            None => PumpState::Stopped,
        };
        let mut domains: Vec<String> = self.publisher.domains().map(str::to_string).collect();
        domains.sort();

        BridgeStatus {
            pump,
            registry: self.registry.stats(),
            response_queue: self.pump_settings.queue.clone(),
            domains,
        }
    }
}
