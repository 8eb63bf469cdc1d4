//! Correlation registry: parks a pending handle per correlation id until the
//! matching response arrives, the deadline elapses or the bridge shuts down.
//!
//! Flow:
//! 1. The publisher calls [`CorrelationRegistry::register`] and gets a
//!    [`PendingResponse`] future back.
//! 2. The response pump calls [`CorrelationRegistry::complete`] when a reply
//!    with that id is read off the response queue.
//! 3. The caller awaits the future, which settles exactly once.
//!
//! Removal from the map decides which settler wins. Whoever removes the
//! entry settles it; every later attempt finds nothing and is a no-op. The
//! oneshot send happens after removal, outside the map's bucket locks.
//!
//! Every entry carries a ticket unique to its registration. Deadline timers
//! and abandoned callers only remove the entry holding their own ticket, so
//! they can never settle a different registration of the same id.
use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    task::{Context, Poll, ready},
    time::Duration,
};

use futures_util::FutureExt;
use scc::HashMap;
use serde::Serialize;
use tokio::{sync::oneshot, task::AbortHandle, time::Instant};

use crate::core::{
    error::{FailureKind, RegistryError},
    message::CorrelationId,
};

/// Final result delivered to a waiting caller.
pub type Outcome = Result<serde_json::Value, FailureKind>;

/// A registered request waiting for its response.
struct PendingEntry {
    ticket: u64,
    sender: oneshot::Sender<Outcome>,
    created_at: Instant,
    timer: AbortHandle,
}

/// How an entry left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Completed,
    TimedOut,
    Cancelled,
    Abandoned,
}

#[derive(Debug, Default)]
struct Counters {
    registered: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    abandoned: AtomicU64,
    unmatched: AtomicU64,
}

/// Point-in-time copy of the registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub registered: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    /// Requests whose caller stopped waiting before any settlement.
    pub abandoned: u64,
    /// Responses that arrived for an unknown or already settled id.
    pub unmatched: u64,
    pub pending: usize,
}

struct Inner {
    pending: HashMap<CorrelationId, PendingEntry>,
    closed: AtomicBool,
    next_ticket: AtomicU64,
    counters: Counters,
}

/// Concurrent map from correlation id to pending request. Cheap to clone.
#[derive(Clone)]
pub struct CorrelationRegistry {
    inner: Arc<Inner>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: HashMap::new(),
                closed: AtomicBool::new(false),
                next_ticket: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Register `id` and start its deadline timer.
    ///
    /// Fails with [`RegistryError::DuplicateCorrelationId`] if `id` is
    /// already pending and with [`RegistryError::ShutDown`] once
    /// [`shutdown`](Self::shutdown) has run.
    pub async fn register(
        &self,
        id: CorrelationId,
        timeout: Duration,
    ) -> Result<PendingResponse, RegistryError> {
        if self.is_shut_down() {
            tracing::warn!(correlation_id = %id, "Registration rejected: registry shut down");
            return Err(RegistryError::ShutDown);
        }

        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let created_at = Instant::now();
        let deadline = created_at + timeout;
        let timer = self.spawn_deadline_timer(id.clone(), ticket, deadline, timeout);

        let entry = PendingEntry {
            ticket,
            sender,
            created_at,
            timer,
        };

        if let Err((id, entry)) = self.inner.pending.insert_async(id.clone(), entry).await {
            entry.timer.abort();
            tracing::error!(
                correlation_id = %id,
                "Duplicate correlation id registered; the id generator is not unique"
            );
            return Err(RegistryError::DuplicateCorrelationId(id));
        }
        self.inner.counters.registered.fetch_add(1, Ordering::Relaxed);

        // A shutdown that raced with the insert may have missed this entry.
        if self.is_shut_down() {
            if let Some(entry) = self.take_ticket(&id, ticket).await {
                entry.timer.abort();
                self.settle_entry(&id, entry, Err(FailureKind::Cancelled), Settlement::Cancelled);
            }
            return Err(RegistryError::ShutDown);
        }

        // The timer can only have fired before the insert if the deadline is
        // already behind us; expire here so the entry does not outlive it.
        if Instant::now() >= deadline {
            self.expire(&id, ticket, timeout).await;
        }

        tracing::debug!(
            correlation_id = %id,
            timeout_ms = timeout.as_millis() as u64,
            "Registered pending request"
        );

        Ok(PendingResponse {
            correlation_id: id,
            ticket,
            receiver: Some(receiver),
            registry: self.clone(),
        })
    }

    /// Settle the entry for `id` with `outcome`.
    ///
    /// Returns `false` when no entry exists. That happens for duplicate
    /// deliveries, late replies that lost the race with the deadline and
    /// replies meant for another gateway, and is not an error.
    pub async fn complete(&self, id: &CorrelationId, outcome: Outcome) -> bool {
        match self.take(id).await {
            Some(entry) => {
                entry.timer.abort();
                let settlement = match &outcome {
                    Err(FailureKind::Cancelled) => Settlement::Cancelled,
                    _ => Settlement::Completed,
                };
                self.settle_entry(id, entry, outcome, settlement);
                true
            }
            None => {
                self.inner.counters.unmatched.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    correlation_id = %id,
                    "No pending request found for correlation id"
                );
                false
            }
        }
    }

    /// Settle the entry for `id` with an error. Used when a request has to
    /// be abandoned before any reply could exist, e.g. a failed publish.
    pub async fn reject(&self, id: &CorrelationId, failure: FailureKind) -> bool {
        match self.take(id).await {
            Some(entry) => {
                entry.timer.abort();
                self.settle_entry(id, entry, Err(failure), Settlement::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Cancel every pending request and refuse new registrations.
    ///
    /// Returns the number of requests that were cancelled.
    pub async fn shutdown(&self) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);

        let mut ids = Vec::new();
        self.inner
            .pending
            .retain_async(|id, _| {
                ids.push(id.clone());
                true
            })
            .await;

        let mut cancelled = 0;
        for id in ids {
            if let Some(entry) = self.take(&id).await {
                entry.timer.abort();
                self.settle_entry(&id, entry, Err(FailureKind::Cancelled), Settlement::Cancelled);
                cancelled += 1;
            }
        }

        tracing::info!("Correlation registry shut down, cancelled {} pending requests", cancelled);
        cancelled
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Whether a request with this id is still waiting.
    pub async fn is_pending(&self, id: &CorrelationId) -> bool {
        self.inner.pending.get_async(id).await.is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn stats(&self) -> RegistryStats {
        let counters = &self.inner.counters;
        RegistryStats {
            registered: counters.registered.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            timed_out: counters.timed_out.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            abandoned: counters.abandoned.load(Ordering::Relaxed),
            unmatched: counters.unmatched.load(Ordering::Relaxed),
            pending: self.pending_count(),
        }
    }

    fn spawn_deadline_timer(
        &self,
        id: CorrelationId,
        ticket: u64,
        deadline: Instant,
        timeout: Duration,
    ) -> AbortHandle {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            registry.expire(&id, ticket, timeout).await;
        })
        .abort_handle()
    }

    /// Deadline elapsed. Runs on the timer task itself, so the timer is not
    /// aborted here.
    async fn expire(&self, id: &CorrelationId, ticket: u64, timeout: Duration) {
        if let Some(entry) = self.take_ticket(id, ticket).await {
            tracing::warn!(
                correlation_id = %id,
                timeout_ms = timeout.as_millis() as u64,
                "Pending request timed out"
            );
            self.settle_entry(id, entry, Err(FailureKind::Timeout(timeout)), Settlement::TimedOut);
        }
    }

    async fn take(&self, id: &CorrelationId) -> Option<PendingEntry> {
        self.inner
            .pending
            .remove_async(id)
            .await
            .map(|(_, entry)| entry)
    }

    /// The caller dropped its [`PendingResponse`] before it resolved.
    async fn abandon(&self, id: &CorrelationId, ticket: u64) {
        if let Some(entry) = self.take_ticket(id, ticket).await {
            entry.timer.abort();
            self.settle_entry(id, entry, Err(FailureKind::Cancelled), Settlement::Abandoned);
        }
    }

    async fn take_ticket(&self, id: &CorrelationId, ticket: u64) -> Option<PendingEntry> {
        self.inner
            .pending
            .remove_if_async(id, |entry| entry.ticket == ticket)
            .await
            .map(|(_, entry)| entry)
    }

    fn settle_entry(
        &self,
        id: &CorrelationId,
        entry: PendingEntry,
        outcome: Outcome,
        settlement: Settlement,
    ) {
        let counter = match settlement {
            Settlement::Completed => &self.inner.counters.completed,
            Settlement::TimedOut => &self.inner.counters.timed_out,
            Settlement::Cancelled => &self.inner.counters.cancelled,
            Settlement::Abandoned => &self.inner.counters.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let elapsed = entry.created_at.elapsed();
        if entry.sender.send(outcome).is_err() {
            tracing::debug!(
                correlation_id = %id,
                "Caller stopped waiting before the request settled"
            );
        } else {
            tracing::debug!(
                correlation_id = %id,
                settlement = ?settlement,
                elapsed_ms = elapsed.as_millis() as u64,
                "Settled pending request"
            );
        }
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`CorrelationRegistry::register`]. Resolves once, with
/// whatever outcome settled the entry.
///
/// Dropping it before it resolves removes the entry and stops its timer.
pub struct PendingResponse {
    correlation_id: CorrelationId,
    ticket: u64,
    /// `None` once the outcome has been delivered.
    receiver: Option<oneshot::Receiver<Outcome>>,
    registry: CorrelationRegistry,
}

impl PendingResponse {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }
}

impl Future for PendingResponse {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Poll::Ready(Err(FailureKind::Cancelled));
        };
        // A dropped sender means the entry was discarded without an outcome.
        let outcome = ready!(receiver.poll_unpin(cx)).unwrap_or(Err(FailureKind::Cancelled));
        self.receiver = None;
        Poll::Ready(outcome)
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        let Some(mut receiver) = self.receiver.take() else {
            return;
        };
        // Settled but never polled: nothing left in the map.
        if !matches!(
            receiver.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let registry = self.registry.clone();
        let id = self.correlation_id.clone();
        let ticket = self.ticket;
        runtime.spawn(async move {
            tracing::debug!(correlation_id = %id, "Caller stopped waiting, discarding request");
            registry.abandon(&id, ticket).await;
        });
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("correlation_id", &self.correlation_id)
            .field("settled", &self.receiver.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_register_and_complete() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::from("xyz");

        let pending = registry
            .register(id.clone(), Duration::from_millis(5000))
            .await
            .unwrap();
        assert_eq!(pending.correlation_id(), &id);
        assert!(registry.is_pending(&id).await);

        assert!(registry.complete(&id, Ok(json!({"status": "done"}))).await);
        assert_eq!(pending.await, Ok(json!({"status": "done"})));

        assert!(!registry.complete(&id, Ok(json!(null))).await);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses_with_timeout() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::from("abc");
        let started = Instant::now();

        let pending = registry
            .register(id.clone(), Duration::from_millis(100))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!registry.is_pending(&id).await);

        let outcome = pending.await;
        assert_eq!(outcome, Err(FailureKind::Timeout(Duration::from_millis(100))));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(registry.stats().timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_never_fires_early() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::from("early");
        let _pending = registry
            .register(id.clone(), Duration::from_millis(100))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(registry.is_pending(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_cancels_deadline_timer() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::from("fast");
        let pending = registry
            .register(id.clone(), Duration::from_millis(50))
            .await
            .unwrap();

        assert!(registry.complete(&id, Ok(json!(1))).await);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(pending.await, Ok(json!(1)));
        let stats = registry.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.timed_out, 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::from("dup");
        let first = registry
            .register(id.clone(), Duration::from_secs(30))
            .await
            .unwrap();

        let second = registry.register(id.clone(), Duration::from_secs(30)).await;
        assert_eq!(
            second.unwrap_err(),
            RegistryError::DuplicateCorrelationId(id.clone())
        );

        // The first entry is untouched.
        assert!(registry.complete(&id, Ok(json!("first"))).await);
        assert_eq!(first.await, Ok(json!("first")));
    }

    #[tokio::test]
    async fn test_unknown_id_has_no_side_effects() {
        let registry = CorrelationRegistry::new();
        let known = CorrelationId::from("known");
        let _pending = registry
            .register(known.clone(), Duration::from_secs(30))
            .await
            .unwrap();

        assert!(!registry.complete(&CorrelationId::from("stranger"), Ok(json!(null))).await);
        assert!(registry.is_pending(&known).await);
        assert_eq!(registry.stats().unmatched, 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_and_rejects_new() {
        let registry = CorrelationRegistry::new();
        let a = registry
            .register(CorrelationId::from("a"), Duration::from_secs(30))
            .await
            .unwrap();
        let b = registry
            .register(CorrelationId::from("b"), Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(registry.shutdown().await, 2);
        assert_eq!(a.await, Err(FailureKind::Cancelled));
        assert_eq!(b.await, Err(FailureKind::Cancelled));
        assert_eq!(registry.pending_count(), 0);

        let late = registry
            .register(CorrelationId::from("c"), Duration::from_secs(30))
            .await;
        assert_eq!(late.unwrap_err(), RegistryError::ShutDown);
    }

    #[tokio::test]
    async fn test_reject_settles_with_failure() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::from("publish-fail");
        let pending = registry
            .register(id.clone(), Duration::from_secs(30))
            .await
            .unwrap();

        assert!(
            registry
                .reject(&id, FailureKind::PublishFailed("queue down".into()))
                .await
        );
        assert_eq!(
            pending.await,
            Err(FailureKind::PublishFailed("queue down".into()))
        );
        assert!(!registry.reject(&id, FailureKind::Cancelled).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_matches_do_not_cross_talk() {
        let registry = CorrelationRegistry::new();
        let count = 200;

        let mut waiters = Vec::new();
        for i in 0..count {
            let id = CorrelationId::from(format!("req-{i}"));
            let pending = registry
                .register(id, Duration::from_secs(30))
                .await
                .unwrap();
            waiters.push(tokio::spawn(async move { (i, pending.await) }));
        }

        let mut completers = Vec::new();
        for i in (0..count).rev() {
            let registry = registry.clone();
            completers.push(tokio::spawn(async move {
                let id = CorrelationId::from(format!("req-{i}"));
                registry.complete(&id, Ok(json!({ "n": i }))).await
            }));
        }

        for completer in completers {
            assert!(completer.await.unwrap());
        }
        for waiter in waiters {
            let (i, outcome) = waiter.await.unwrap();
            assert_eq!(outcome, Ok(json!({ "n": i })));
        }
        assert_eq!(registry.stats().completed, count as u64);
    }

    #[tokio::test]
    async fn test_dropped_caller_discards_entry() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::from("gone");
        let pending = registry
            .register(id.clone(), Duration::from_secs(30))
            .await
            .unwrap();
        drop(pending);

        while registry.is_pending(&id).await {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.stats().abandoned, 1);
        assert!(!registry.complete(&id, Ok(json!(null))).await);
    }

    #[tokio::test]
    async fn test_dropping_settled_response_is_a_no_op() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::from("settled");
        let pending = registry
            .register(id.clone(), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(registry.complete(&id, Ok(json!(1))).await);

        // Re-register the same id; the old handle must not touch it.
        let again = registry
            .register(id.clone(), Duration::from_secs(30))
            .await
            .unwrap();
        drop(pending);
        tokio::task::yield_now().await;

        assert!(registry.is_pending(&id).await);
        assert_eq!(registry.stats().abandoned, 0);
        assert!(registry.complete(&id, Ok(json!(2))).await);
        assert_eq!(again.await, Ok(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_duplicate_timer_leaves_original_alone() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::from("dup-zero");
        let original = registry
            .register(id.clone(), Duration::from_secs(30))
            .await
            .unwrap();

        let duplicate = registry.register(id.clone(), Duration::ZERO).await;
        assert!(duplicate.is_err());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(registry.is_pending(&id).await);
        assert_eq!(registry.stats().timed_out, 0);
        assert!(registry.complete(&id, Ok(json!("kept"))).await);
        assert_eq!(original.await, Ok(json!("kept")));
    }
}
