use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::Notify, time::Instant};
use uuid::Uuid;

use crate::{
    core::message::Envelope,
    ports::message_queue::{MessageQueue, RawMessage, TransportError, TransportResult},
};

#[derive(Default)]
struct QueueContents {
    ready: VecDeque<RawMessage>,
    in_flight: HashMap<String, RawMessage>,
}

#[derive(Default)]
struct QueueState {
    contents: Mutex<QueueContents>,
    arrivals: Notify,
}

impl QueueState {
    fn lock(&self) -> TransportResult<std::sync::MutexGuard<'_, QueueContents>> {
        self.contents
            .lock()
            .map_err(|_| TransportError::ConnectionError("in-memory queue lock poisoned".into()))
    }

    fn take_ready(&self, max_messages: usize) -> TransportResult<Vec<RawMessage>> {
        let mut contents = self.lock()?;
        let count = max_messages.min(contents.ready.len());
        let batch: Vec<RawMessage> = contents.ready.drain(..count).collect();
        for message in &batch {
            contents
                .in_flight
                .insert(message.receipt_handle.clone(), message.clone());
        }
        Ok(batch)
    }
}

/// Process-local queue transport.
///
/// Queues are created on first use and keyed by whatever target string the
/// caller passes (a URL or a plain name). Received messages stay in flight
/// until acknowledged. There is no visibility timeout, so unacknowledged
/// messages are never redelivered.
#[derive(Default)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, queue: &str) -> TransportResult<Arc<QueueState>> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| TransportError::ConnectionError("in-memory queue lock poisoned".into()))?;
        Ok(queues.entry(queue.to_string()).or_default().clone())
    }

    /// Enqueue a raw body, as an external producer would.
    pub fn push_body(&self, queue: &str, body: impl Into<String>) {
        let message = RawMessage {
            message_id: Uuid::new_v4().to_string(),
            receipt_handle: Uuid::new_v4().to_string(),
            body: body.into(),
        };
        match self.state(queue) {
            Ok(state) => match state.lock() {
                Ok(mut contents) => {
                    contents.ready.push_back(message);
                    drop(contents);
                    state.arrivals.notify_one();
                }
                Err(e) => tracing::error!("Failed to enqueue on {}: {}", queue, e),
            },
            Err(e) => tracing::error!("Failed to enqueue on {}: {}", queue, e),
        }
    }

    /// Remove and return every ready message without marking it in flight.
    pub fn drain(&self, queue: &str) -> Vec<RawMessage> {
        self.state(queue)
            .and_then(|state| state.lock().map(|mut c| c.ready.drain(..).collect()))
            .unwrap_or_default()
    }

    pub fn ready_count(&self, queue: &str) -> usize {
        self.state(queue)
            .and_then(|state| state.lock().map(|c| c.ready.len()))
            .unwrap_or(0)
    }

    pub fn in_flight_count(&self, queue: &str) -> usize {
        self.state(queue)
            .and_then(|state| state.lock().map(|c| c.in_flight.len()))
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn publish(&self, queue: &str, envelope: &Envelope) -> TransportResult<()> {
        let body = envelope
            .to_body()
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        self.push_body(queue, body);
        tracing::debug!("Event published to {}: {}", queue, envelope.event_type());
        Ok(())
    }

    async fn receive_batch(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
    ) -> TransportResult<Vec<RawMessage>> {
        let state = self.state(queue)?;
        let deadline = Instant::now() + wait;

        loop {
            let batch = state.take_ready(max_messages)?;
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, state.arrivals.notified())
                .await
                .is_err()
            {
                return state.take_ready(max_messages);
            }
        }
    }

    async fn acknowledge(&self, queue: &str, message: &RawMessage) -> TransportResult<()> {
        let state = self.state(queue)?;
        let mut contents = state.lock()?;
        if contents.in_flight.remove(&message.receipt_handle).is_none() {
            tracing::debug!(
                "Acknowledged unknown receipt handle {} on {}",
                message.receipt_handle,
                queue
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::message::CorrelationId;

    #[tokio::test]
    async fn test_publish_then_receive_and_acknowledge() {
        let queue = InMemoryQueue::new();
        let envelope = Envelope::new("USER_GET", CorrelationId::from("c1"), json!({"id": "1"}));
        queue.publish("users", &envelope).await.unwrap();

        let batch = queue
            .receive_batch("users", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        let decoded: Envelope = serde_json::from_str(&batch[0].body).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(queue.in_flight_count("users"), 1);

        queue.acknowledge("users", &batch[0]).await.unwrap();
        assert_eq!(queue.in_flight_count("users"), 0);
    }

    #[tokio::test]
    async fn test_batch_limit_respected() {
        let queue = InMemoryQueue::new();
        for i in 0..15 {
            queue.push_body("q", format!("{i}"));
        }
        let batch = queue
            .receive_batch("q", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(batch.len(), 10);
        assert_eq!(batch[0].body, "0");
        assert_eq!(queue.ready_count("q"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_long_poll_waits_full_duration() {
        let queue = InMemoryQueue::new();
        let started = Instant::now();
        let batch = queue
            .receive_batch("q", 10, Duration::from_secs(20))
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_arrival() {
        let queue = Arc::new(InMemoryQueue::new());
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push_body("q", "hello");
        });

        let batch = tokio::time::timeout(
            Duration::from_secs(5),
            queue.receive_batch("q", 10, Duration::from_secs(60)),
        )
        .await
        .expect("long poll did not wake")
        .unwrap();
        assert_eq!(batch[0].body, "hello");
    }
}
