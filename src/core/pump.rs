//! Response pump: drains the shared response queue and settles the matching
//! pending requests.
//!
//! The pump is a single long-running task with two working states. In
//! [`PumpState::Polling`] it long-polls the response queue; after a transport
//! error it sits in [`PumpState::BackoffAfterError`] for a fixed interval and
//! then polls again. Transport errors are never fatal. The loop only ends
//! when its [`CancellationToken`] fires, which moves it to
//! [`PumpState::Stopped`].
//!
//! Every received message is acknowledged whether or not it matched a
//! pending request, including messages that fail to decode. Matching is
//! idempotent, so redelivered or late replies are harmless.
use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    config::GatewayConfig,
    core::{message::ResponseMessage, registry::CorrelationRegistry},
    ports::message_queue::{MessageQueue, RawMessage, TransportResult},
    tracing_setup::component_span,
};

/// Tuning for the response pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpSettings {
    /// The shared response queue.
    pub queue: String,
    /// Batch size requested per long-poll.
    pub max_messages: usize,
    /// Long-poll wait.
    pub wait_time: Duration,
    /// Pause after a transport error before polling again.
    pub error_backoff: Duration,
}

impl PumpSettings {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            max_messages: 10,
            wait_time: Duration::from_secs(20),
            error_backoff: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            queue: config.queues.response_queue.clone(),
            max_messages: config.pump.max_messages,
            wait_time: Duration::from_secs(config.pump.wait_time_secs),
            error_backoff: Duration::from_secs(config.pump.error_backoff_secs),
        }
    }
}

/// Loop state of the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpState {
    Polling,
    BackoffAfterError,
    Stopped,
}

/// What happened to a single response-queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Settled a pending request.
    Matched,
    /// Decoded, but no request was waiting for it.
    Unmatched,
    /// Could not be decoded and was dropped.
    Discarded,
}

pub struct ResponsePump {
    registry: CorrelationRegistry,
    queue: Arc<dyn MessageQueue>,
    settings: PumpSettings,
    state: watch::Sender<PumpState>,
}

impl ResponsePump {
    pub fn new(
        registry: CorrelationRegistry,
        queue: Arc<dyn MessageQueue>,
        settings: PumpSettings,
    ) -> Self {
        let (state, _) = watch::channel(PumpState::Polling);
        Self {
            registry,
            queue,
            settings,
            state,
        }
    }

    pub fn settings(&self) -> &PumpSettings {
        &self.settings
    }

    pub fn state(&self) -> PumpState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<PumpState> {
        self.state.subscribe()
    }

    /// Run the pump on its own task and return a handle that can stop it.
    pub fn spawn(self, cancel: CancellationToken) -> PumpHandle {
        let state = self.watch_state();
        let token = cancel.clone();
        let span = component_span("response_pump");
        let task = tokio::spawn(async move { self.run(token).await }.instrument(span));
        PumpHandle {
            cancel,
            state,
            task,
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            "Starting response pump on {} (batch: {}, wait: {}s, backoff: {}s)",
            self.settings.queue,
            self.settings.max_messages,
            self.settings.wait_time.as_secs(),
            self.settings.error_backoff.as_secs()
        );

        while !cancel.is_cancelled() {
            self.set_state(PumpState::Polling);

            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.queue.receive_batch(
                    &self.settings.queue,
                    self.settings.max_messages,
                    self.settings.wait_time,
                ) => result,
            };

            match received {
                Ok(messages) => {
                    // A batch already taken off the queue is finished even if
                    // cancellation arrives meanwhile, so it gets acknowledged.
                    self.process_batch(messages).await;
                }
                Err(e) => {
                    tracing::error!(
                        "Error polling responses: {}. Retrying in {}s",
                        e,
                        self.settings.error_backoff.as_secs()
                    );
                    self.set_state(PumpState::BackoffAfterError);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.error_backoff) => {}
                    }
                }
            }
        }

        self.set_state(PumpState::Stopped);
        tracing::info!("Response pump stopped");
    }

    /// Run a single poll cycle. Returns the number of messages handled.
    pub async fn poll_once(&self) -> TransportResult<usize> {
        let messages = self
            .queue
            .receive_batch(
                &self.settings.queue,
                self.settings.max_messages,
                self.settings.wait_time,
            )
            .await?;
        let count = messages.len();
        self.process_batch(messages).await;
        Ok(count)
    }

    async fn process_batch(&self, messages: Vec<RawMessage>) {
        if messages.is_empty() {
            return;
        }
        tracing::debug!("Received {} response messages", messages.len());

        for message in messages {
            self.handle_message(&message).await;
            self.acknowledge(&message).await;
        }
    }

    /// Decode one message and settle its pending request. Does not
    /// acknowledge.
    pub async fn handle_message(&self, message: &RawMessage) -> Disposition {
        let response = match ResponseMessage::decode(&message.body) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    message_id = %message.message_id,
                    "Discarding response that cannot be decoded: {}",
                    e
                );
                return Disposition::Discarded;
            }
        };

        let correlation_id = response.correlation_id.clone();
        tracing::info!(
            correlation_id = %correlation_id,
            success = response.success,
            "Received response"
        );

        if self
            .registry
            .complete(&correlation_id, response.into_outcome())
            .await
        {
            Disposition::Matched
        } else {
            Disposition::Unmatched
        }
    }

    async fn acknowledge(&self, message: &RawMessage) {
        if let Err(e) = self
            .queue
            .acknowledge(&self.settings.queue, message)
            .await
        {
            // The message will be redelivered and then ignored as unmatched.
            tracing::warn!(
                message_id = %message.message_id,
                "Failed to acknowledge response message: {}",
                e
            );
        }
    }

    fn set_state(&self, next: PumpState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                tracing::debug!("Response pump state {:?} -> {:?}", current, next);
                *current = next;
                true
            }
        });
    }
}

/// Supervises a spawned [`ResponsePump`].
pub struct PumpHandle {
    cancel: CancellationToken,
    state: watch::Receiver<PumpState>,
    task: JoinHandle<()>,
}

impl PumpHandle {
    pub fn state(&self) -> PumpState {
        *self.state.borrow()
    }

    /// Observe state transitions of the running pump.
    pub fn watch_state(&self) -> watch::Receiver<PumpState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the pump to stop and wait for its task to end.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("Response pump task ended abnormally: {}", e);
        }
    }
}
