use std::{sync::Arc, time::Duration};

use conduit::{
    Bridge, FailureKind, InMemoryQueue,
    config::GatewayConfig,
    core::{CorrelationId, Envelope, PumpState},
    ports::MessageQueue,
};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

const RESPONSES: &str = "gateway-responses";
const USERS: &str = "users-queue";
const ORDERS: &str = "orders-queue";

fn test_config(timeout_ms: u64) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.queues.response_queue = RESPONSES.to_string();
    config
        .queues
        .domains
        .insert("users".to_string(), USERS.to_string());
    config
        .queues
        .domains
        .insert("orders".to_string(), ORDERS.to_string());
    config.pump.wait_time_secs = 1;
    config.pump.error_backoff_secs = 1;
    config.request.timeout_ms = timeout_ms;
    config
}

/// Consume `work_queue` and reply on the response queue with whatever
/// `reply` builds. Returning `None` leaves the request unanswered.
fn spawn_worker<F>(queue: Arc<InMemoryQueue>, work_queue: &'static str, reply: F) -> JoinHandle<()>
where
    F: Fn(&Envelope) -> Option<Value> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let batch = match queue
                .receive_batch(work_queue, 10, Duration::from_millis(100))
                .await
            {
                Ok(batch) => batch,
                Err(_) => continue,
            };
            for message in batch {
                let envelope: Envelope = serde_json::from_str(&message.body).unwrap();
                if let Some(body) = reply(&envelope) {
                    queue.push_body(RESPONSES, body.to_string());
                }
                queue.acknowledge(work_queue, &message).await.unwrap();
            }
        }
    })
}

fn echo(envelope: &Envelope) -> Option<Value> {
    Some(json!({
        "correlationId": envelope.correlation_id(),
        "success": true,
        "data": { "type": envelope.event_type(), "echo": envelope.data() },
    }))
}

async fn started_bridge(queue: Arc<InMemoryQueue>, timeout_ms: u64) -> Bridge {
    let bridge = Bridge::new(&test_config(timeout_ms), queue);
    bridge.start().await;
    bridge
}

#[tokio::test]
async fn test_request_round_trip() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = spawn_worker(queue.clone(), USERS, echo);
    let bridge = started_bridge(queue.clone(), 5_000).await;

    let reply = bridge
        .send("users", "USER_GET", json!({ "id": "42" }))
        .await
        .unwrap();
    assert_eq!(reply["type"], "USER_GET");
    assert_eq!(reply["echo"]["id"], "42");

    let stats = bridge.registry().stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending, 0);

    worker.abort();
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_remote_failure_is_surfaced() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = spawn_worker(queue.clone(), ORDERS, |envelope| {
        Some(json!({
            "correlationId": envelope.correlation_id(),
            "success": false,
            "errorMessage": "Order not found",
        }))
    });
    let bridge = started_bridge(queue.clone(), 5_000).await;

    let outcome = bridge
        .send("orders", "ORDER_GET", json!({ "id": "missing" }))
        .await;
    assert_eq!(
        outcome,
        Err(FailureKind::RemoteFailure("Order not found".into()))
    );

    worker.abort();
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = spawn_worker(queue.clone(), USERS, |_| None);
    let bridge = started_bridge(queue.clone(), 100).await;

    let outcome = bridge.send("users", "USER_GET", json!({ "id": "1" })).await;
    assert_eq!(
        outcome,
        Err(FailureKind::Timeout(Duration::from_millis(100)))
    );
    assert_eq!(bridge.registry().stats().timed_out, 1);
    assert_eq!(bridge.registry().pending_count(), 0);

    worker.abort();
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_out_of_order_replies_across_domains() {
    let queue = Arc::new(InMemoryQueue::new());
    let bridge = Arc::new(started_bridge(queue.clone(), 5_000).await);

    let first = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.send("users", "USER_GET", json!({ "id": "u" })).await })
    };
    let second = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.send("orders", "ORDER_GET", json!({ "id": "o" })).await })
    };

    // Collect both published events before answering either.
    let mut users = Vec::new();
    let mut orders = Vec::new();
    while users.is_empty() || orders.is_empty() {
        users.extend(queue.drain(USERS));
        orders.extend(queue.drain(ORDERS));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Answer in reverse order of publication.
    for message in orders.iter().chain(users.iter()) {
        let envelope: Envelope = serde_json::from_str(&message.body).unwrap();
        queue.push_body(RESPONSES, echo(&envelope).unwrap().to_string());
    }

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first["echo"]["id"], "u");
    assert_eq!(second["echo"]["id"], "o");

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_late_and_duplicate_replies_are_acknowledged() {
    let queue = Arc::new(InMemoryQueue::new());
    let worker = spawn_worker(queue.clone(), USERS, echo);
    let bridge = started_bridge(queue.clone(), 5_000).await;

    let id = CorrelationId::from("dup-1");
    bridge
        .send_correlated(id.clone(), "users", "USER_GET", json!({ "id": "1" }), None)
        .await
        .unwrap();

    // Redelivery of the reply that was already matched
    queue.push_body(
        RESPONSES,
        json!({ "correlationId": id, "success": true, "data": {} }).to_string(),
    );
    // A reply for an id nobody is waiting on
    queue.push_body(
        RESPONSES,
        json!({ "correlationId": "stale", "success": true, "data": {} }).to_string(),
    );
    while bridge.registry().stats().unmatched < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let stats = bridge.registry().stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.unmatched, 2);
    assert_eq!(queue.ready_count(RESPONSES), 0);

    worker.abort();
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_pending_and_stops_pump() {
    let queue = Arc::new(InMemoryQueue::new());
    let bridge = Arc::new(started_bridge(queue.clone(), 60_000).await);
    assert_eq!(bridge.status().await.pump, PumpState::Polling);

    let waiting = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.send("users", "USER_GET", json!({ "id": "1" })).await })
    };
    while bridge.registry().pending_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    bridge.shutdown().await;
    assert_eq!(waiting.await.unwrap(), Err(FailureKind::Cancelled));
    assert_eq!(bridge.status().await.pump, PumpState::Stopped);

    // New requests are refused once the bridge is down.
    let refused = bridge.send("users", "USER_GET", json!({ "id": "2" })).await;
    assert_eq!(refused, Err(FailureKind::Cancelled));
}

#[tokio::test]
async fn test_unknown_domain() {
    let queue = Arc::new(InMemoryQueue::new());
    let bridge = started_bridge(queue, 1_000).await;

    let outcome = bridge.send("billing", "INVOICE_GET", json!({})).await;
    assert_eq!(outcome, Err(FailureKind::UnknownDomain("billing".into())));

    bridge.shutdown().await;
}
