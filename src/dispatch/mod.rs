//! Request dispatch.
//!
//! Turns one push request into queued tasks, one per notification. In
//! synchronous mode the caller waits until every task has finished (or the
//! client went away) and gets the per-token logs back. Otherwise only
//! submission failures are reported and delivery continues in the
//! background.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::metrics::StatsSink;
use crate::push::log::mark_failed;
use crate::push::{Delivery, LogOptions, LogPushEntry, RequestPush};
use crate::queue::{QueueAdapter, Task};

pub mod barrier;
pub mod collector;
pub mod filter;

pub use barrier::CompletionBarrier;
pub use collector::LogCollector;
pub use filter::{PlatformToggles, filter_enabled};

/// Dispatcher settings derived from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchConfig {
    /// Wait for deliveries before returning. Ignored for non-local queues.
    pub sync: bool,
    pub platforms: PlatformToggles,
    pub log: LogOptions,
}

impl DispatchConfig {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            sync: config.core.sync,
            platforms: config.platforms(),
            log: LogOptions {
                hide_token: config.log.hide_token,
            },
        }
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Default)]
pub struct DispatchResult {
    /// Delivery targets accepted after filtering, whatever their outcome.
    pub count: usize,
    pub logs: Vec<LogPushEntry>,
}

/// Fans a push request out onto the queue.
pub struct Dispatcher {
    queue: Arc<dyn QueueAdapter>,
    delivery: Arc<Delivery>,
    stats: Arc<dyn StatsSink>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn QueueAdapter>,
        delivery: Arc<Delivery>,
        stats: Arc<dyn StatsSink>,
        config: DispatchConfig,
    ) -> Self {
        if config.sync && !queue.is_local() {
            info!(
                engine = %queue.engine(),
                "Sync mode requested with a non-local queue, responses will not wait for delivery"
            );
        }

        Self {
            queue,
            delivery,
            stats,
            config,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<dyn QueueAdapter> {
        &self.queue
    }

    /// Submit every enabled notification in `request`.
    ///
    /// In sync mode this returns once all tasks have finished or `cancel`
    /// fires, whichever is first. Logs gathered up to that point are
    /// returned either way.
    pub async fn dispatch(&self, request: RequestPush, cancel: CancellationToken) -> DispatchResult {
        let sync = self.config.sync && self.queue.is_local();
        let notifications = filter_enabled(request.notifications, &self.config.platforms);

        let collector = LogCollector::new();
        let barrier = sync.then(CompletionBarrier::new);
        let mut count = 0;

        for notification in notifications {
            let notification = Arc::new(notification);
            count += notification.target_count();

            let unit = barrier.as_ref().map(CompletionBarrier::register);
            let logs = sync.then(|| collector.clone());
            let delivery = self.delivery.clone();
            let target = notification.clone();

            let task = Task::new(notification.clone(), move |ctx| async move {
                let _unit = unit;
                let (entries, result) = delivery.deliver(&target, &ctx).await.into_parts();
                if let Some(logs) = logs {
                    logs.extend(entries);
                }
                result
            });

            if let Err(e) = self.queue.submit(task) {
                debug!(platform = %notification.platform, error = %e, "Submission rejected");
                collector.extend(mark_failed(&notification, &e.to_string(), self.config.log));
            }
        }

        if let Some(barrier) = barrier {
            let watcher = {
                let barrier = barrier.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    cancel.cancelled().await;
                    barrier.force_release();
                })
            };

            barrier.wait().await;
            watcher.abort();

            if barrier.is_forced() {
                info!(
                    pending = barrier.pending(),
                    collected = collector.len(),
                    "Client went away, returning partial logs"
                );
            }
        }

        self.stats.add_total_count(count as u64);

        DispatchResult {
            count,
            logs: collector.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::metrics::Metrics;
    use crate::push::notification::notification;
    use crate::push::retry::RetryConfig;
    use crate::push::testing::{PendingSender, SlowSender, always_ok, unregistered_for};
    use crate::push::{Platform, PushNotification, PushSender, PushStatus, TokenReclaimer};
    use crate::queue::{ChannelBroker, ExternalQueue, LocalQueue, QueueEngine, WorkerStats};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Queue that rejects everything as full.
    struct FullQueue;

    #[async_trait]
    impl QueueAdapter for FullQueue {
        fn engine(&self) -> QueueEngine {
            QueueEngine::Local
        }

        fn submit(&self, _task: Task) -> Result<()> {
            Err(Error::QueueFull)
        }

        fn stats(&self) -> WorkerStats {
            WorkerStats::default()
        }

        async fn shutdown(&self) {}
    }

    fn dispatcher(
        queue: Arc<dyn QueueAdapter>,
        sender: Arc<dyn PushSender>,
        reclaimer: Option<Arc<TokenReclaimer>>,
        config: DispatchConfig,
    ) -> (Dispatcher, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let delivery = Arc::new(Delivery::new(sender, reclaimer, metrics.clone()));
        (
            Dispatcher::new(queue, delivery, metrics.clone(), config),
            metrics,
        )
    }

    fn sync_config() -> DispatchConfig {
        DispatchConfig {
            sync: true,
            ..DispatchConfig::default()
        }
    }

    fn request(notifications: Vec<PushNotification>) -> RequestPush {
        RequestPush { notifications }
    }

    #[tokio::test]
    async fn test_disabled_platforms_are_invisible() {
        let config = DispatchConfig {
            sync: true,
            platforms: PlatformToggles {
                ios: true,
                android: false,
                huawei: false,
            },
            ..DispatchConfig::default()
        };
        let (dispatcher, metrics) = dispatcher(
            Arc::new(LocalQueue::new(2, 16)),
            Arc::new(always_ok()),
            None,
            config,
        );

        let result = dispatcher
            .dispatch(
                request(vec![
                    notification(Platform::Ios, &["a", "b"]),
                    notification(Platform::Android, &["c", "d", "e"]),
                    notification(Platform::Huawei, &["f"]),
                    notification(Platform::Ios, &["g"]),
                ]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(result.count, 3);
        assert_eq!(result.logs.len(), 3);
        assert!(result.logs.iter().all(|l| l.platform == Platform::Ios));
        assert_eq!(metrics.total(), 3);
        assert_eq!(dispatcher.queue().stats().submitted_tasks, 2);
    }

    #[tokio::test]
    async fn test_capacity_rejection_logs_every_target() {
        for sync in [true, false] {
            let config = DispatchConfig {
                sync,
                ..DispatchConfig::default()
            };
            let (dispatcher, metrics) =
                dispatcher(Arc::new(FullQueue), Arc::new(always_ok()), None, config);

            let mut with_topic = notification(Platform::Android, &["a", "b"]);
            with_topic.to = Some("/topics/news".to_string());

            let result = timeout(
                Duration::from_secs(1),
                dispatcher.dispatch(
                    request(vec![with_topic, notification(Platform::Ios, &["c"])]),
                    CancellationToken::new(),
                ),
            )
            .await
            .expect("capacity rejection must not block");

            assert_eq!(result.count, 4);
            let targets: Vec<&str> = result.logs.iter().map(|l| l.token.as_str()).collect();
            assert_eq!(targets, vec!["a", "b", "/topics/news", "c"]);
            for entry in &result.logs {
                assert_eq!(entry.status, PushStatus::Failed);
                assert_eq!(entry.error.as_deref(), Some("max capacity reached"));
            }
            assert_eq!(metrics.total(), 4);
        }
    }

    #[tokio::test]
    async fn test_capacity_rejection_masks_tokens() {
        let config = DispatchConfig {
            log: LogOptions { hide_token: true },
            ..DispatchConfig::default()
        };
        let (dispatcher, _) = dispatcher(Arc::new(FullQueue), Arc::new(always_ok()), None, config);

        let token = "0123456789abcdefghij0123456789";
        let result = dispatcher
            .dispatch(
                request(vec![notification(Platform::Ios, &[token])]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(result.logs.len(), 1);
        assert_eq!(result.logs[0].token, "**********abcdefghij**********");
    }

    #[tokio::test]
    async fn test_unregistered_tokens_release_barrier_and_reclaim() {
        let mock_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path_regex(r"^/token-x[0-9]$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
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
        let dead: Vec<String> = (1..=3).map(|i| format!("token-x{i}")).collect();
        let (dispatcher, metrics) = dispatcher(
            Arc::new(LocalQueue::new(4, 64)),
            Arc::new(unregistered_for(dead.clone())),
            Some(reclaimer.clone()),
            sync_config(),
        );

        let mut notifications: Vec<PushNotification> = (1..=7)
            .map(|i| notification(Platform::Ios, &[format!("token-ok{i}").as_str()]))
            .collect();
        for token in &dead {
            notifications.insert(2, notification(Platform::Ios, &[token.as_str()]));
        }

        let result = timeout(
            Duration::from_secs(2),
            dispatcher.dispatch(request(notifications), CancellationToken::new()),
        )
        .await
        .expect("dispatch must not hang");

        assert_eq!(result.count, 10);
        assert_eq!(result.logs.len(), 10);
        assert_eq!(metrics.success(Platform::Ios), 7);
        assert_eq!(metrics.error(Platform::Ios), 3);

        reclaimer.drain().await;
    }

    #[tokio::test]
    async fn test_cancellation_releases_sync_dispatch() {
        let queue = Arc::new(LocalQueue::new(2, 8));
        let (dispatcher, metrics) =
            dispatcher(queue, Arc::new(PendingSender), None, sync_config());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = timeout(
            Duration::from_secs(2),
            dispatcher.dispatch(
                request(vec![
                    notification(Platform::Ios, &["a"]),
                    notification(Platform::Android, &["b"]),
                ]),
                cancel,
            ),
        )
        .await
        .expect("cancellation must release the dispatch");

        assert_eq!(result.count, 2);
        assert!(result.logs.is_empty());
        assert_eq!(metrics.total(), 2);
    }

    #[tokio::test]
    async fn test_sync_downgraded_for_external_queue() {
        // Nobody consumes the broker, so a waiting dispatch would never return.
        let queue = Arc::new(ExternalQueue::new(Arc::new(ChannelBroker::new(16))));
        let (dispatcher, metrics) =
            dispatcher(queue, Arc::new(always_ok()), None, sync_config());

        let result = timeout(
            Duration::from_millis(500),
            dispatcher.dispatch(
                request(vec![
                    notification(Platform::Ios, &["a", "b"]),
                    notification(Platform::Android, &["c"]),
                ]),
                CancellationToken::new(),
            ),
        )
        .await
        .expect("external queue dispatch must not wait");

        assert_eq!(result.count, 3);
        assert!(result.logs.is_empty());
        assert_eq!(metrics.total(), 3);
        assert_eq!(dispatcher.queue().stats().submitted_tasks, 2);
    }

    #[tokio::test]
    async fn test_async_mode_returns_after_submission() {
        let sender = Arc::new(SlowSender::new(Duration::from_millis(200)));
        let (dispatcher, _) = dispatcher(
            Arc::new(LocalQueue::new(2, 8)),
            sender.clone(),
            None,
            DispatchConfig::default(),
        );

        let result = dispatcher
            .dispatch(
                request(vec![notification(Platform::Ios, &["a"])]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(result.count, 1);
        assert!(result.logs.is_empty());
        assert_eq!(sender.completed(), 0);
    }

    #[tokio::test]
    async fn test_sync_end_to_end() {
        let sender = Arc::new(SlowSender::new(Duration::from_millis(50)));
        let (dispatcher, metrics) = dispatcher(
            Arc::new(LocalQueue::new(2, 8)),
            sender.clone(),
            None,
            sync_config(),
        );

        let result = dispatcher
            .dispatch(
                request(vec![
                    notification(Platform::Ios, &["a", "b"]),
                    notification(Platform::Ios, &["c"]),
                ]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(result.count, 3);
        assert_eq!(result.logs.len(), 3);
        assert!(result.logs.iter().all(|l| l.status == PushStatus::Success));
        assert_eq!(sender.completed(), 2);
        assert_eq!(metrics.success(Platform::Ios), 3);
        assert_eq!(metrics.total(), 3);
    }
}
