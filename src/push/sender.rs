//! Delivery backend seam.
//!
//! Platform backends live behind [`PushSender`]. The dispatch core treats a
//! send as opaque: it gets back per-token logs and, optionally, an error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;
use crate::push::log::{LogOptions, LogPushEntry, mark_failed};
use crate::push::notification::{Platform, PushNotification};

/// Result of one send.
#[derive(Debug, Default)]
pub struct SendOutcome {
    /// One entry per target, in token order.
    pub logs: Vec<LogPushEntry>,
    /// Set when the backend reported a failure for the notification.
    pub error: Option<Error>,
}

impl SendOutcome {
    #[must_use]
    pub fn ok(logs: Vec<LogPushEntry>) -> Self {
        Self { logs, error: None }
    }

    #[must_use]
    pub fn failed(logs: Vec<LogPushEntry>, error: Error) -> Self {
        Self {
            logs,
            error: Some(error),
        }
    }
}

/// A push delivery backend.
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Deliver `notification` to all of its targets.
    ///
    /// `ctx` is cancelled when the owning worker pool shuts down.
    async fn send(&self, notification: &PushNotification, ctx: &CancellationToken) -> SendOutcome;
}

/// Routes each notification to the backend registered for its platform.
#[derive(Default)]
pub struct PlatformSenders {
    backends: HashMap<Platform, Arc<dyn PushSender>>,
    log_options: LogOptions,
}

impl PlatformSenders {
    #[must_use]
    pub fn new(log_options: LogOptions) -> Self {
        Self {
            backends: HashMap::new(),
            log_options,
        }
    }

    /// Register the backend for `platform`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, platform: Platform, sender: Arc<dyn PushSender>) -> Self {
        self.backends.insert(platform, sender);
        self
    }

    #[must_use]
    pub fn has(&self, platform: Platform) -> bool {
        self.backends.contains_key(&platform)
    }
}

#[async_trait]
impl PushSender for PlatformSenders {
    async fn send(&self, notification: &PushNotification, ctx: &CancellationToken) -> SendOutcome {
        match self.backends.get(&notification.platform) {
            Some(backend) => backend.send(notification, ctx).await,
            None => {
                let reason = format!("no backend for platform {}", notification.platform);
                warn!(platform = %notification.platform, "No delivery backend configured");
                SendOutcome::failed(
                    mark_failed(notification, &reason, self.log_options),
                    Error::Delivery(reason),
                )
            }
        }
    }
}

/// Backend that records every target as delivered without contacting a
/// provider.
pub struct LoggingSender {
    log_options: LogOptions,
}

impl LoggingSender {
    #[must_use]
    pub fn new(log_options: LogOptions) -> Self {
        Self { log_options }
    }
}

#[async_trait]
impl PushSender for LoggingSender {
    async fn send(&self, notification: &PushNotification, _ctx: &CancellationToken) -> SendOutcome {
        let mut logs: Vec<LogPushEntry> = notification
            .tokens
            .iter()
            .map(|token| LogPushEntry::success(notification, token, self.log_options))
            .collect();

        if let Some(topic) = notification.topic() {
            logs.push(LogPushEntry::success(
                notification,
                topic,
                LogOptions { hide_token: false },
            ));
        }

        debug!(
            platform = %notification.platform,
            targets = logs.len(),
            "Notification accepted by logging backend"
        );

        SendOutcome::ok(logs)
    }
}
