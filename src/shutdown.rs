//! Graceful shutdown handling.
//!
//! Listens for SIGTERM and SIGINT signals and coordinates shutdown through a
//! root [`CancellationToken`].

use std::time::Duration;

use tokio::signal;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Shutdown coordinator.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    token: CancellationToken,
}

impl ShutdownHandler {
    /// Create a new shutdown handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a token that is cancelled on shutdown.
    pub fn subscribe(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Trigger a shutdown.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for a shutdown signal (SIGTERM or SIGINT), or for a manual
    /// trigger.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating shutdown");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating shutdown");
            }
            _ = self.token.cancelled() => {
                info!("Shutdown triggered");
            }
        }

        self.trigger();
    }
}

/// Run `shutdown_fn`, giving up after `limit`.
///
/// Returns whether it completed in time.
pub async fn graceful_shutdown<F, Fut>(limit: Duration, shutdown_fn: F) -> bool
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    match timeout(limit, shutdown_fn()).await {
        Ok(()) => {
            info!("Graceful shutdown completed");
            true
        }
        Err(_) => {
            warn!("Graceful shutdown timed out after {:?}", limit);
            false
        }
    }
}
