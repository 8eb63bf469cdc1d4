use std::{future::Future, time::Duration};

use eyre::{Result, WrapErr};
use tokio::{signal, sync::watch, time::timeout};

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Triggered from code, e.g. by a test or an embedding application
    Requested,
}

/// Turns OS signals into a single shutdown notification and bounds how long
/// the drain afterwards may take.
pub struct GracefulShutdown {
    reason_tx: watch::Sender<Option<ShutdownReason>>,
    /// Maximum time to wait for in-flight work to drain
    drain_timeout: Duration,
}

impl GracefulShutdown {
    /// Create a new GracefulShutdown manager with default 30-second drain timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(drain_timeout: Duration) -> Self {
        let (reason_tx, _) = watch::channel(None);
        Self {
            reason_tx,
            drain_timeout,
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.reason_tx.borrow().is_some()
    }

    /// Trigger shutdown. Only the first reason is kept.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        let first = self.reason_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            tracing::info!("Shutdown initiated: {:?}", reason);
        } else {
            tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
        }
    }

    /// Listen for SIGINT and SIGTERM until one arrives or shutdown is
    /// triggered some other way.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");
        let mut token = self.shutdown_token();

        tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for Ctrl+C")?;
                self.trigger_shutdown(ShutdownReason::Interrupt);
            }
            result = wait_for_sigterm() => {
                result?;
                self.trigger_shutdown(ShutdownReason::Terminate);
            }
            _ = token.wait_for_shutdown() => {}
        }

        Ok(())
    }

    /// Run `drain` to completion or until the drain timeout expires.
    /// Returns `false` when the timeout cut it short.
    pub async fn drain<F>(&self, drain: F) -> bool
    where
        F: Future<Output = ()>,
    {
        match timeout(self.drain_timeout, drain).await {
            Ok(()) => true,
            Err(_) => {
                tracing::error!(
                    "Drain timeout exceeded ({:?}), forcing shutdown",
                    self.drain_timeout
                );
                false
            }
        }
    }

    /// Create a shutdown token that can be used to cancel operations
    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.reason_tx.subscribe(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm =
        signal(SignalKind::terminate()).wrap_err("Failed to register SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}

/// A token that can be used to wait for the shutdown signal
#[derive(Clone)]
pub struct ShutdownToken {
    receiver: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownToken {
    pub fn is_shutdown_initiated(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Wait until shutdown is initiated. Resolves immediately if it already was.
    pub async fn wait_for_shutdown(&mut self) -> Option<ShutdownReason> {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            // Sender dropped without a signal; treat as a requested stop.
            Err(_) => Some(ShutdownReason::Requested),
        }
    }
}
