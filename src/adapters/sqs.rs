use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use reqwest::{Client, header};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    core::message::Envelope,
    ports::message_queue::{MessageQueue, RawMessage, TransportError, TransportResult},
};

const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const TARGET_PREFIX: &str = "AmazonSQS";

/// SQS queue adapter speaking the JSON protocol over HTTP(S).
///
/// Responsibilities:
/// * `SendMessage` with `eventType`, `correlationId` and `replyTo` message attributes
/// * `ReceiveMessage` long polling with all message attributes requested
/// * `DeleteMessage` to acknowledge a delivery
///
/// Requests are not signed, so this talks to SQS-compatible endpoints that
/// accept anonymous calls (ElasticMQ, LocalStack) or to a signing proxy.
pub struct SqsQueue {
    client: Client,
    endpoint: String,
    reply_to: Option<String>,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ReceiveMessageOutput {
    #[serde(rename = "Messages", default)]
    messages: Vec<SqsMessage>,
}

#[derive(Debug, Deserialize)]
struct SqsMessage {
    #[serde(rename = "MessageId")]
    message_id: String,
    #[serde(rename = "ReceiptHandle")]
    receipt_handle: String,
    #[serde(rename = "Body", default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct ErrorOutput {
    #[serde(rename = "__type", default)]
    kind: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
}

impl SqsQueue {
    /// Create a new adapter.
    ///
    /// `endpoint` is the service root (e.g. `http://localhost:9324`).
    /// `reply_to` is advertised on every published message so workers know
    /// where to send their response.
    pub fn new(
        endpoint: impl Into<String>,
        reply_to: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .wrap_err("Failed to build HTTP client for SQS transport")?;

        let endpoint = endpoint.into();
        tracing::info!("Created SQS transport for endpoint {}", endpoint);
        Ok(Self {
            client,
            endpoint,
            reply_to,
            request_timeout,
        })
    }

    async fn call(
        &self,
        action: &str,
        queue: &str,
        payload: Value,
        timeout: Duration,
    ) -> TransportResult<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{action}"))
            .timeout(timeout)
            .body(payload.to_string())
            .send()
            .await
            .map_err(|e| TransportError::ConnectionError(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::ConnectionError(e.to_string()))?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(TransportError::Rejected {
                action: action.to_string(),
                queue: queue.to_string(),
                message: error_detail(status.as_u16(), &text),
            })
        }
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn publish(&self, queue: &str, envelope: &Envelope) -> TransportResult<()> {
        let payload = send_message_payload(queue, envelope, self.reply_to.as_deref())?;
        self.call("SendMessage", queue, payload, self.request_timeout)
            .await?;
        tracing::info!(
            correlation_id = %envelope.correlation_id(),
            "Event {} published to {}",
            envelope.event_type(),
            queue
        );
        Ok(())
    }

    async fn receive_batch(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
    ) -> TransportResult<Vec<RawMessage>> {
        let payload = json!({
            "QueueUrl": queue,
            "MaxNumberOfMessages": max_messages,
            "WaitTimeSeconds": wait.as_secs(),
            "MessageAttributeNames": ["All"],
        });
        // The server holds the request open for up to `wait`.
        let text = self
            .call("ReceiveMessage", queue, payload, wait + self.request_timeout)
            .await?;
        parse_receive_output(&text)
    }

    async fn acknowledge(&self, queue: &str, message: &RawMessage) -> TransportResult<()> {
        let payload = json!({
            "QueueUrl": queue,
            "ReceiptHandle": message.receipt_handle,
        });
        self.call("DeleteMessage", queue, payload, self.request_timeout)
            .await?;
        Ok(())
    }
}

fn string_attribute(value: &str) -> Value {
    json!({ "DataType": "String", "StringValue": value })
}

/// Build the `SendMessage` request body for an envelope.
fn send_message_payload(
    queue: &str,
    envelope: &Envelope,
    reply_to: Option<&str>,
) -> TransportResult<Value> {
    let body = envelope
        .to_body()
        .map_err(|e| TransportError::Encode(e.to_string()))?;

    let mut attributes = serde_json::Map::new();
    attributes.insert(
        "eventType".to_string(),
        string_attribute(envelope.event_type()),
    );
    attributes.insert(
        "correlationId".to_string(),
        string_attribute(envelope.correlation_id().as_str()),
    );
    if let Some(reply_to) = reply_to {
        attributes.insert("replyTo".to_string(), string_attribute(reply_to));
    }

    Ok(json!({
        "QueueUrl": queue,
        "MessageBody": body,
        "MessageAttributes": attributes,
    }))
}

fn parse_receive_output(text: &str) -> TransportResult<Vec<RawMessage>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let output: ReceiveMessageOutput =
        serde_json::from_str(text).map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

    Ok(output
        .messages
        .into_iter()
        .map(|m| RawMessage {
            message_id: m.message_id,
            receipt_handle: m.receipt_handle,
            body: m.body,
        })
        .collect())
}

fn error_detail(status: u16, text: &str) -> String {
    match serde_json::from_str::<ErrorOutput>(text) {
        Ok(ErrorOutput {
            kind: Some(kind),
            message,
        }) => format!(
            "HTTP {status} {kind}: {}",
            message.unwrap_or_else(|| "no message".to_string())
        ),
        _ if text.is_empty() => format!("HTTP {status}"),
        _ => format!("HTTP {status}: {text}"),
    }
}
