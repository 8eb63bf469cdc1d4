use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::{
    core::{
        error::FailureKind,
        message::{CorrelationId, Envelope},
        registry::{CorrelationRegistry, Outcome, PendingResponse},
    },
    ports::message_queue::MessageQueue,
};

/// Caller-facing entry point of the bridge.
///
/// Each call registers a pending request under a fresh correlation id,
/// publishes an [`Envelope`] to the domain's work queue and hands back a
/// future that the response pump or the deadline eventually settles.
/// Registration happens before the publish so a reply can never arrive for
/// an id the registry does not know yet.
#[derive(Clone)]
pub struct RequestPublisher {
    registry: CorrelationRegistry,
    queue: Arc<dyn MessageQueue>,
    work_queues: Arc<HashMap<String, String>>,
}

impl RequestPublisher {
    /// `work_queues` maps a domain name (e.g. `orders`) to its queue target.
    pub fn new(
        registry: CorrelationRegistry,
        queue: Arc<dyn MessageQueue>,
        work_queues: HashMap<String, String>,
    ) -> Self {
        Self {
            registry,
            queue,
            work_queues: Arc::new(work_queues),
        }
    }

    /// Publish a request and wait for its outcome.
    pub async fn send(
        &self,
        domain: &str,
        event_type: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Outcome {
        self.send_correlated(CorrelationId::new(), domain, event_type, payload, timeout)
            .await
    }

    /// Like [`send`](Self::send) with a caller-chosen correlation id, so the
    /// id can be reported back even when the request fails.
    pub async fn send_correlated(
        &self,
        correlation_id: CorrelationId,
        domain: &str,
        event_type: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Outcome {
        self.dispatch(correlation_id, domain, event_type, payload, timeout)
            .await?
            .await
    }

    /// Register and publish, returning the pending handle without waiting.
    ///
    /// If the publish fails the registry entry is rejected immediately and
    /// [`FailureKind::PublishFailed`] is returned.
    pub async fn dispatch(
        &self,
        correlation_id: CorrelationId,
        domain: &str,
        event_type: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<PendingResponse, FailureKind> {
        let target = self
            .work_queues
            .get(domain)
            .ok_or_else(|| FailureKind::UnknownDomain(domain.to_string()))?;

        let pending = self
            .registry
            .register(correlation_id.clone(), timeout)
            .await?;

        let envelope = Envelope::new(event_type, correlation_id.clone(), payload);

        if let Err(e) = self.queue.publish(target, &envelope).await {
            tracing::error!(
                correlation_id = %correlation_id,
                "Error publishing to {} queue: {}",
                domain,
                e
            );
            let failure = FailureKind::PublishFailed(e.to_string());
            self.registry.reject(&correlation_id, failure.clone()).await;
            return Err(failure);
        }

        tracing::info!(
            correlation_id = %correlation_id,
            "Event {} published to {} queue",
            event_type,
            domain
        );
        Ok(pending)
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.work_queues.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        adapters::memory_queue::InMemoryQueue,
        ports::message_queue::{RawMessage, TransportError, TransportResult},
    };

    struct RejectingQueue;

    #[async_trait]
    impl MessageQueue for RejectingQueue {
        async fn publish(&self, queue: &str, _envelope: &Envelope) -> TransportResult<()> {
            Err(TransportError::UnknownQueue(queue.to_string()))
        }

        async fn receive_batch(
            &self,
            _queue: &str,
            _max_messages: usize,
            _wait: Duration,
        ) -> TransportResult<Vec<RawMessage>> {
            Ok(Vec::new())
        }

        async fn acknowledge(&self, _queue: &str, _message: &RawMessage) -> TransportResult<()> {
            Ok(())
        }
    }

    fn work_queues() -> HashMap<String, String> {
        HashMap::from([
            ("orders".to_string(), "orders-queue".to_string()),
            ("users".to_string(), "users-queue".to_string()),
        ])
    }

    #[tokio::test]
    async fn test_dispatch_publishes_envelope_to_domain_queue() {
        let queue = Arc::new(InMemoryQueue::new());
        let registry = CorrelationRegistry::new();
        let publisher = RequestPublisher::new(registry.clone(), queue.clone(), work_queues());

        let id = CorrelationId::from("order-1");
        let pending = publisher
            .dispatch(
                id.clone(),
                "orders",
                "ORDER_CREATE",
                json!({"userId": "user123", "items": ["item1"], "total": 9.5}),
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        assert!(registry.is_pending(&id).await);
        let published = queue.drain("orders-queue");
        assert_eq!(published.len(), 1);
        let envelope: Envelope = serde_json::from_str(&published[0].body).unwrap();
        assert_eq!(envelope.event_type(), "ORDER_CREATE");
        assert_eq!(envelope.correlation_id(), &id);
        assert_eq!(envelope.data()["userId"], "user123");
        assert!(chrono::DateTime::parse_from_rfc3339(envelope.timestamp()).is_ok());

        registry.complete(&id, Ok(json!({"orderId": "o-1"}))).await;
        assert_eq!(pending.await, Ok(json!({"orderId": "o-1"})));
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_no_pending_entry() {
        let registry = CorrelationRegistry::new();
        let publisher = RequestPublisher::new(registry.clone(), Arc::new(RejectingQueue), work_queues());

        let id = CorrelationId::from("doomed");
        let outcome = publisher
            .send_correlated(
                id.clone(),
                "users",
                "USER_CREATE",
                json!({}),
                Duration::from_secs(30),
            )
            .await;

        assert!(matches!(outcome, Err(FailureKind::PublishFailed(_))));
        assert!(!registry.is_pending(&id).await);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_domain_is_not_registered() {
        let registry = CorrelationRegistry::new();
        let publisher =
            RequestPublisher::new(registry.clone(), Arc::new(InMemoryQueue::new()), work_queues());

        let outcome = publisher
            .send("invoices", "INVOICE_GET", json!({}), Duration::from_secs(1))
            .await;
        assert_eq!(outcome, Err(FailureKind::UnknownDomain("invoices".into())));
        assert_eq!(registry.stats().registered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out_without_reply() {
        let queue = Arc::new(InMemoryQueue::new());
        let publisher = RequestPublisher::new(CorrelationRegistry::new(), queue, work_queues());

        let outcome = publisher
            .send("users", "USER_GET", json!({"id": "1"}), Duration::from_millis(100))
            .await;
        assert_eq!(outcome, Err(FailureKind::Timeout(Duration::from_millis(100))));
    }

    #[tokio::test]
    async fn test_send_after_shutdown_is_cancelled() {
        let registry = CorrelationRegistry::new();
        registry.shutdown().await;
        let publisher =
            RequestPublisher::new(registry, Arc::new(InMemoryQueue::new()), work_queues());

        let outcome = publisher
            .send("users", "USER_GET", json!({}), Duration::from_secs(1))
            .await;
        assert_eq!(outcome, Err(FailureKind::Cancelled));
    }
}
