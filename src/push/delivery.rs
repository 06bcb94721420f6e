//! One delivery attempt for one notification.
//!
//! Shared by local pool tasks and the external queue consumer: sends through
//! the backend, records per-platform stats, and turns "Unregistered" errors
//! into detached token cleanup instead of a task failure.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metrics::StatsSink;
use crate::push::log::LogPushEntry;
use crate::push::notification::PushNotification;
use crate::push::reclaim::TokenReclaimer;
use crate::push::sender::{PushSender, SendOutcome};

/// Outcome of [`Delivery::deliver`].
#[derive(Debug)]
pub struct DeliveryReport {
    /// Logs produced by the backend, in token order.
    pub logs: Vec<LogPushEntry>,
    /// Hard failure. Unregistered-token errors never appear here.
    pub error: Option<Error>,
}

impl DeliveryReport {
    /// Split into logs and the task result.
    pub fn into_parts(self) -> (Vec<LogPushEntry>, Result<()>) {
        let result = match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        };
        (self.logs, result)
    }
}

/// Sends notifications and handles their side effects.
pub struct Delivery {
    sender: Arc<dyn PushSender>,
    reclaimer: Option<Arc<TokenReclaimer>>,
    stats: Arc<dyn StatsSink>,
}

impl Delivery {
    pub fn new(
        sender: Arc<dyn PushSender>,
        reclaimer: Option<Arc<TokenReclaimer>>,
        stats: Arc<dyn StatsSink>,
    ) -> Self {
        Self {
            sender,
            reclaimer,
            stats,
        }
    }

    /// Send `notification` once.
    pub async fn deliver(
        &self,
        notification: &PushNotification,
        ctx: &CancellationToken,
    ) -> DeliveryReport {
        let SendOutcome { logs, error } = self.sender.send(notification, ctx).await;

        self.record(notification, &logs);

        match error {
            Some(err) if err.is_unregistered() => {
                warn!(
                    platform = %notification.platform,
                    tokens = notification.tokens.len(),
                    "Unregistered tokens reported, scheduling cleanup"
                );
                if let Some(reclaimer) = &self.reclaimer {
                    reclaimer.spawn(notification.tokens.iter().cloned());
                }
                DeliveryReport { logs, error: None }
            }
            Some(err) => {
                debug!(platform = %notification.platform, error = %err, "Delivery failed");
                DeliveryReport {
                    logs,
                    error: Some(err),
                }
            }
            None => DeliveryReport { logs, error: None },
        }
    }

    fn record(&self, notification: &PushNotification, logs: &[LogPushEntry]) {
        let delivered = logs.iter().filter(|entry| entry.is_success()).count() as u64;
        let failed = logs.len() as u64 - delivered;

        if delivered > 0 {
            self.stats.add_success(notification.platform, delivered);
        }
        if failed > 0 {
            self.stats.add_error(notification.platform, failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::push::notification::{Platform, notification};
    use crate::push::retry::RetryConfig;
    use crate::push::testing::{FnSender, always_ok, failure_logs, unregistered_for};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_success_records_stats() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let delivery = Delivery::new(Arc::new(always_ok()), None, metrics.clone());

        let report = delivery
            .deliver(
                &notification(Platform::Android, &["a", "b"]),
                &CancellationToken::new(),
            )
            .await;

        assert!(report.error.is_none());
        assert_eq!(report.logs.len(), 2);
        assert_eq!(metrics.success(Platform::Android), 2);
        assert_eq!(metrics.error(Platform::Android), 0);
    }

    #[tokio::test]
    async fn test_generic_error_is_hard_failure() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let sender = FnSender(|n: &PushNotification| {
            SendOutcome::failed(
                failure_logs(n, "BadDeviceToken"),
                Error::Delivery("BadDeviceToken".to_string()),
            )
        });
        let delivery = Delivery::new(Arc::new(sender), None, metrics.clone());

        let report = delivery
            .deliver(&notification(Platform::Ios, &["a"]), &CancellationToken::new())
            .await;
        let (logs, result) = report.into_parts();

        assert_eq!(logs.len(), 1);
        assert!(result.is_err());
        assert_eq!(metrics.error(Platform::Ios), 1);
    }

    #[tokio::test]
    async fn test_unregistered_is_soft_and_reclaims_every_token() {
        let mock_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/dead-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/dead-2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let reclaimer = Arc::new(
            TokenReclaimer::with_base_url(
                &mock_server.uri(),
                RetryConfig {
                    max_attempts: 3,
                    backoff: Duration::from_millis(10),
                },
                Duration::from_secs(2),
            )
            .unwrap(),
        );
        let metrics = Arc::new(Metrics::new().unwrap());
        let delivery = Delivery::new(
            Arc::new(unregistered_for(vec!["dead-1".to_string()])),
            Some(reclaimer.clone()),
            metrics,
        );

        let report = delivery
            .deliver(
                &notification(Platform::Ios, &["dead-1", "dead-2"]),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.logs.len(), 2);
        let (_, result) = report.into_parts();
        assert!(result.is_ok());

        reclaimer.drain().await;
    }

    #[tokio::test]
    async fn test_unregistered_without_reclaimer() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let delivery = Delivery::new(
            Arc::new(unregistered_for(vec!["dead".to_string()])),
            None,
            metrics,
        );

        let report = delivery
            .deliver(&notification(Platform::Ios, &["dead"]), &CancellationToken::new())
            .await;

        assert!(report.error.is_none());
        assert_eq!(report.logs.len(), 1);
    }
}
