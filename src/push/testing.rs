//! Scripted delivery backends for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::push::log::{LogOptions, LogPushEntry};
use crate::push::notification::PushNotification;
use crate::push::sender::{PushSender, SendOutcome};

/// One success entry per token.
pub(crate) fn success_logs(notification: &PushNotification) -> Vec<LogPushEntry> {
    notification
        .tokens
        .iter()
        .map(|t| LogPushEntry::success(notification, t, LogOptions::default()))
        .collect()
}

/// One failed entry per token.
pub(crate) fn failure_logs(notification: &PushNotification, reason: &str) -> Vec<LogPushEntry> {
    notification
        .tokens
        .iter()
        .map(|t| LogPushEntry::failure(notification, t, reason, LogOptions::default()))
        .collect()
}

/// Backend whose outcome is computed by a closure.
pub(crate) struct FnSender<F>(pub F);

#[async_trait]
impl<F> PushSender for FnSender<F>
where
    F: Fn(&PushNotification) -> SendOutcome + Send + Sync,
{
    async fn send(&self, notification: &PushNotification, _ctx: &CancellationToken) -> SendOutcome {
        (self.0)(notification)
    }
}

/// Backend that always succeeds.
pub(crate) fn always_ok() -> FnSender<impl Fn(&PushNotification) -> SendOutcome + Send + Sync> {
    FnSender(|n: &PushNotification| SendOutcome::ok(success_logs(n)))
}

/// Backend that reports the notification's tokens as unregistered when its
/// first token is listed in `unregistered`.
pub(crate) fn unregistered_for(
    unregistered: Vec<String>,
) -> FnSender<impl Fn(&PushNotification) -> SendOutcome + Send + Sync> {
    FnSender(move |n: &PushNotification| {
        match n.tokens.first().filter(|t| unregistered.contains(t)) {
            Some(token) => SendOutcome::failed(
                failure_logs(n, "Unregistered"),
                Error::Delivery(format!("Unregistered: {token}")),
            ),
            None => SendOutcome::ok(success_logs(n)),
        }
    })
}

/// Backend that never completes.
pub(crate) struct PendingSender;

#[async_trait]
impl PushSender for PendingSender {
    async fn send(&self, _notification: &PushNotification, _ctx: &CancellationToken) -> SendOutcome {
        std::future::pending().await
    }
}

/// Backend that succeeds after a delay and counts completed sends.
pub(crate) struct SlowSender {
    pub delay: Duration,
    pub completed: AtomicUsize,
}

impl SlowSender {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            completed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushSender for SlowSender {
    async fn send(&self, notification: &PushNotification, _ctx: &CancellationToken) -> SendOutcome {
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        SendOutcome::ok(success_logs(notification))
    }
}
