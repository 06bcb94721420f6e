//! Broker-backed queue.
//!
//! Submitting serializes the notification and hands the bytes to a
//! [`Broker`]. The task's closure never runs, so nothing it captured
//! reports back to the submitter. Delivery happens wherever the broker's
//! messages are consumed; [`ExternalQueue::spawn_consumer`] runs such a
//! consumer in-process for the bundled [`ChannelBroker`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::push::{Delivery, PushNotification};
use crate::queue::{Counters, QueueAdapter, QueueEngine, Task, WorkerStats};

/// Destination for serialized notifications.
pub trait Broker: Send + Sync {
    fn name(&self) -> &str;

    /// Publish one message without blocking.
    fn publish(&self, payload: Vec<u8>) -> Result<()>;
}

/// Bounded in-process broker.
pub struct ChannelBroker {
    sender: mpsc::Sender<Vec<u8>>,
    receiver: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl ChannelBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Take the consuming end. Returns `None` once taken.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.receiver.lock().take()
    }
}

impl Broker for ChannelBroker {
    fn name(&self) -> &str {
        "channel"
    }

    fn publish(&self, payload: Vec<u8>) -> Result<()> {
        self.sender.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueFull,
            mpsc::error::TrySendError::Closed(_) => {
                Error::Queue("channel broker has no consumer".to_string())
            }
        })
    }
}

/// Queue adapter that publishes to a [`Broker`].
pub struct ExternalQueue {
    broker: Arc<dyn Broker>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ExternalQueue {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        info!(broker = broker.name(), "External queue configured");
        Self {
            broker,
            counters: Arc::new(Counters::default()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Consume `receiver` in the background, delivering each message.
    ///
    /// Consumer outcomes feed this queue's success and failure counters.
    pub fn spawn_consumer(&self, mut receiver: mpsc::Receiver<Vec<u8>>, delivery: Arc<Delivery>) {
        let counters = self.counters.clone();
        let shutdown = self.shutdown.clone();

        self.tracker.spawn(async move {
            loop {
                let payload = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        debug!("Broker consumer detected shutdown, exiting");
                        break;
                    }
                    payload = receiver.recv() => payload,
                };

                let Some(payload) = payload else {
                    debug!("Broker channel closed, consumer exiting");
                    break;
                };

                let notification: PushNotification = match serde_json::from_slice(&payload) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "Discarding undecodable broker message");
                        counters.finished(false);
                        continue;
                    }
                };

                let outcome = {
                    let _busy = counters.busy();
                    AssertUnwindSafe(delivery.deliver(&notification, &shutdown))
                        .catch_unwind()
                        .await
                };

                match outcome {
                    Ok(report) => {
                        let (_, result) = report.into_parts();
                        counters.finished(result.is_ok());
                    }
                    Err(_) => {
                        warn!(platform = %notification.platform, "Delivery panicked");
                        counters.finished(false);
                    }
                }
            }
        });
    }
}

#[async_trait]
impl QueueAdapter for ExternalQueue {
    fn engine(&self) -> QueueEngine {
        QueueEngine::External
    }

    fn submit(&self, task: Task) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::QueueClosed);
        }

        let payload = serde_json::to_vec(task.notification())?;
        self.broker.publish(payload).inspect_err(|e| {
            warn!(
                broker = self.broker.name(),
                platform = %task.notification().platform,
                error = %e,
                "Broker rejected notification"
            );
        })?;

        self.counters.submitted();
        Ok(())
    }

    fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!(broker = self.broker.name(), "Stopping external queue");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::push::Platform;
    use crate::push::notification::notification;
    use crate::push::testing::{FnSender, always_ok, failure_logs};
    use crate::push::SendOutcome;
    use std::time::Duration;

    fn noop_task(n: PushNotification) -> Task {
        Task::new(Arc::new(n), |_| async { Ok(()) })
    }

    async fn wait_for(queue: &ExternalQueue, done: u64) {
        for _ in 0..200 {
            let stats = queue.stats();
            if stats.success_tasks + stats.failure_tasks >= done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("consumer did not finish: {:?}", queue.stats());
    }

    #[tokio::test]
    async fn test_submit_publishes_json_and_drops_closure() {
        let broker = Arc::new(ChannelBroker::new(4));
        let mut receiver = broker.take_receiver().unwrap();
        assert!(broker.take_receiver().is_none());

        let queue = ExternalQueue::new(broker);
        assert!(!queue.is_local());
        assert_eq!(queue.engine(), QueueEngine::External);

        let marker = Arc::new(());
        let captured = marker.clone();
        let n = notification(Platform::Android, &["t1", "t2"]);
        let task = Task::new(Arc::new(n.clone()), move |_| {
            let _held = captured;
            async { Ok(()) }
        });

        queue.submit(task).unwrap();
        assert_eq!(Arc::strong_count(&marker), 1);
        assert_eq!(queue.stats().submitted_tasks, 1);

        let payload = receiver.recv().await.unwrap();
        let decoded: PushNotification = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded, n);
    }

    #[tokio::test]
    async fn test_full_broker_rejects() {
        let broker = Arc::new(ChannelBroker::new(1));
        let queue = ExternalQueue::new(broker.clone());

        queue
            .submit(noop_task(notification(Platform::Ios, &["a"])))
            .unwrap();
        let err = queue
            .submit(noop_task(notification(Platform::Ios, &["b"])))
            .unwrap_err();

        assert!(matches!(err, Error::QueueFull));
        assert_eq!(queue.stats().submitted_tasks, 1);
    }

    #[tokio::test]
    async fn test_consumer_delivers_and_counts() {
        let broker = Arc::new(ChannelBroker::new(8));
        let receiver = broker.take_receiver().unwrap();
        let queue = ExternalQueue::new(broker);

        let metrics = Arc::new(Metrics::new().unwrap());
        let sender = FnSender(|n: &PushNotification| {
            if n.tokens.first().is_some_and(|t| t == "bad") {
                SendOutcome::failed(
                    failure_logs(n, "BadDeviceToken"),
                    Error::Delivery("BadDeviceToken".into()),
                )
            } else {
                SendOutcome::ok(crate::push::testing::success_logs(n))
            }
        });
        let delivery = Arc::new(Delivery::new(Arc::new(sender), None, metrics.clone()));
        queue.spawn_consumer(receiver, delivery);

        queue
            .submit(noop_task(notification(Platform::Ios, &["ok-1", "ok-2"])))
            .unwrap();
        queue
            .submit(noop_task(notification(Platform::Ios, &["bad"])))
            .unwrap();

        wait_for(&queue, 2).await;
        let stats = queue.stats();
        assert_eq!(stats.success_tasks, 1);
        assert_eq!(stats.failure_tasks, 1);
        assert_eq!(metrics.success(Platform::Ios), 2);
        assert_eq!(metrics.error(Platform::Ios), 1);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_consumer_skips_garbage() {
        let broker = Arc::new(ChannelBroker::new(8));
        let receiver = broker.take_receiver().unwrap();
        let queue = ExternalQueue::new(broker.clone());

        let metrics = Arc::new(Metrics::new().unwrap());
        let delivery = Arc::new(Delivery::new(Arc::new(always_ok()), None, metrics));
        queue.spawn_consumer(receiver, delivery);

        broker.publish(b"not json".to_vec()).unwrap();
        queue
            .submit(noop_task(notification(Platform::Android, &["a"])))
            .unwrap();

        wait_for(&queue, 2).await;
        assert_eq!(queue.stats().failure_tasks, 1);
        assert_eq!(queue.stats().success_tasks, 1);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_broker_without_consumer_rejects() {
        let broker = Arc::new(ChannelBroker::new(4));
        drop(broker.take_receiver());
        let queue = ExternalQueue::new(broker);

        let err = queue
            .submit(noop_task(notification(Platform::Ios, &["a"])))
            .unwrap_err();
        assert!(matches!(err, Error::Queue(_)));
        assert_eq!(queue.stats().submitted_tasks, 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let queue = ExternalQueue::new(Arc::new(ChannelBroker::new(4)));
        queue.shutdown().await;

        let err = queue
            .submit(noop_task(notification(Platform::Ios, &["a"])))
            .unwrap_err();
        assert!(matches!(err, Error::QueueClosed));
    }
}
