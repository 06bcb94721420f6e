//! Invalid token cleanup.
//!
//! When a provider reports a token as unregistered, the token is removed from
//! the external token registry with `DELETE {base_url}/{token}`. Calls run
//! detached from the request that triggered them, are retried a bounded
//! number of times, and never report failure beyond a log line.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Url};
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::ReclaimerConfig;
use crate::error::{Error, Result};
use crate::push::retry::{self, AttemptResult, RetryConfig};

/// Removes unregistered tokens from the token registry.
pub struct TokenReclaimer {
    client: Client,
    base_url: Url,
    retry: RetryConfig,
    tracker: TaskTracker,
}

impl TokenReclaimer {
    /// Create a reclaimer from configuration.
    pub fn new(config: &ReclaimerConfig) -> Result<Self> {
        let retry = RetryConfig {
            max_attempts: config.max_attempts,
            backoff: config.backoff(),
        };
        Self::with_base_url(&config.resolve_base_url(), retry, config.timeout())
    }

    /// Create a reclaimer against an explicit registry URL.
    pub fn with_base_url(base_url: &str, retry: RetryConfig, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url).map_err(|e| {
            Error::InvalidConfig(format!("invalid reclaimer base URL '{base_url}': {e}"))
        })?;
        if parsed.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "reclaimer base URL '{base_url}' cannot carry a path"
            )));
        }

        let client = Client::builder().timeout(timeout).build()?;

        info!(base_url = %parsed, "Token reclaimer configured");

        Ok(Self {
            client,
            base_url: parsed,
            retry,
            tracker: TaskTracker::new(),
        })
    }

    /// Registry URL for `token`. The token is escaped as one path segment.
    #[must_use]
    pub fn token_url(&self, token: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(token);
        }
        url
    }

    /// Delete `token` from the registry, retrying transient failures.
    ///
    /// Returns whether the registry acknowledged the deletion.
    pub async fn reclaim(&self, token: &str) -> bool {
        let url = self.token_url(token);

        let deleted = retry::with_retry(&self.retry, "token reclaim", || {
            let request = self.client.delete(url.clone());
            async move {
                match request.send().await {
                    Ok(response) if response.status().is_success() => AttemptResult::Done(()),
                    Ok(response) => AttemptResult::Retriable(format!("status {}", response.status())),
                    Err(e) => AttemptResult::Retriable(e.to_string()),
                }
            }
        })
        .await
        .is_some();

        if deleted {
            debug!("Unregistered token reclaimed");
        }

        deleted
    }

    /// Schedule reclamation of `tokens` in the background.
    pub fn spawn<I>(self: &Arc<Self>, tokens: I)
    where
        I: IntoIterator<Item = String>,
    {
        for token in tokens {
            let reclaimer = Arc::clone(self);
            self.tracker.spawn(async move {
                reclaimer.reclaim(&token).await;
            });
        }
    }

    /// Number of reclaims still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every scheduled reclaim to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
