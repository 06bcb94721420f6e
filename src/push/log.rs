//! Per-token push outcome records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::push::notification::{Platform, PushNotification};

/// Characters masked at each end of a token.
const TOKEN_MARK_LEN: usize = 10;

/// Terminal outcome of one delivery target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushStatus {
    #[serde(rename = "succeeded-push")]
    Success,
    #[serde(rename = "failed-push")]
    Failed,
}

/// Options applied when building log entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Mask device tokens.
    pub hide_token: bool,
}

/// Outcome of one (notification, token) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPushEntry {
    #[serde(rename = "notif_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub status: PushStatus,
    pub platform: Platform,
    pub token: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LogPushEntry {
    fn new(
        notification: &PushNotification,
        token: &str,
        status: PushStatus,
        error: Option<String>,
        options: LogOptions,
    ) -> Self {
        let token = if options.hide_token {
            hide_token(token, TOKEN_MARK_LEN)
        } else {
            token.to_string()
        };

        Self {
            id: notification.id.clone(),
            status,
            platform: notification.platform,
            token,
            message: notification.message.clone(),
            error,
            timestamp: Utc::now(),
        }
    }

    /// Record a delivered target.
    #[must_use]
    pub fn success(notification: &PushNotification, token: &str, options: LogOptions) -> Self {
        Self::new(notification, token, PushStatus::Success, None, options)
    }

    /// Record a failed target with its reason.
    #[must_use]
    pub fn failure(
        notification: &PushNotification,
        token: &str,
        reason: impl Into<String>,
        options: LogOptions,
    ) -> Self {
        Self::new(
            notification,
            token,
            PushStatus::Failed,
            Some(reason.into()),
            options,
        )
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == PushStatus::Success
    }
}

/// Failed entries for every target of `notification`: tokens in order, then
/// the topic.
#[must_use]
pub fn mark_failed(
    notification: &PushNotification,
    reason: &str,
    options: LogOptions,
) -> Vec<LogPushEntry> {
    let mut logs: Vec<LogPushEntry> = notification
        .tokens
        .iter()
        .map(|token| LogPushEntry::failure(notification, token, reason, options))
        .collect();

    if let Some(topic) = notification.topic() {
        logs.push(LogPushEntry::failure(
            notification,
            topic,
            reason,
            LogOptions { hide_token: false },
        ));
    }

    logs
}

/// Mask `mark_len` characters at both ends of a token. Tokens too short to
/// keep anything visible are masked entirely.
#[must_use]
pub fn hide_token(token: &str, mark_len: usize) -> String {
    let len = token.chars().count();
    if len < mark_len * 2 {
        return "*".repeat(len);
    }

    token
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if i < mark_len || i >= len - mark_len {
                '*'
            } else {
                c
            }
        })
        .collect()
}
