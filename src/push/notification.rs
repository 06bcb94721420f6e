//! Notification request model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Target push platform.
///
/// Encoded on the wire as `1` (iOS), `2` (Android) and `3` (Huawei).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Platform {
    Ios,
    Android,
    Huawei,
}

impl Platform {
    /// All platforms, in wire order.
    pub const ALL: [Platform; 3] = [Platform::Ios, Platform::Android, Platform::Huawei];

    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
            Self::Huawei => "huawei",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for Platform {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Ios),
            2 => Ok(Self::Android),
            3 => Ok(Self::Huawei),
            other => Err(format!("unknown platform {other}")),
        }
    }
}

impl From<Platform> for u8 {
    fn from(platform: Platform) -> Self {
        match platform {
            Platform::Ios => 1,
            Platform::Android => 2,
            Platform::Huawei => 3,
        }
    }
}

/// One addressed push message targeting one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushNotification {
    #[serde(rename = "notif_id", default)]
    pub id: String,

    /// Device tokens, delivered in order.
    #[serde(default)]
    pub tokens: Vec<String>,

    pub platform: Platform,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Topic address, an alternative to listing tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Free-form payload passed through to the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl PushNotification {
    /// Topic address, if one is set and non-empty.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.to.as_deref().filter(|to| !to.is_empty())
    }

    /// Number of delivery targets: every token plus the topic.
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.tokens.len() + usize::from(self.topic().is_some())
    }
}

/// A batch of notifications as posted to the push endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPush {
    pub notifications: Vec<PushNotification>,
}

impl RequestPush {
    /// Check the batch is non-empty and within `max_notification`.
    pub fn validate(&self, max_notification: usize) -> Result<()> {
        if self.notifications.is_empty() {
            return Err(Error::Validation("Notifications field is empty.".into()));
        }

        if self.notifications.len() > max_notification {
            return Err(Error::Validation(format!(
                "Number of notifications({}) over limit({})",
                self.notifications.len(),
                max_notification
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn notification(platform: Platform, tokens: &[&str]) -> PushNotification {
    PushNotification {
        id: String::new(),
        tokens: tokens.iter().map(|t| t.to_string()).collect(),
        platform,
        message: "hello".to_string(),
        title: None,
        to: None,
        data: None,
    }
}
