//! Token-bucket rate limiting for outbound platform actions.
//!
//! Two layers of `governor` buckets: one bot-wide bucket matching the
//! platform's aggregate action ceiling, and a lower per-chat bucket
//! created lazily for each chat. A dispatch takes tokens from both (chat
//! first, then global) before the network call executes; bucket
//! accounting is atomic, so concurrent acquires can never overdraw a
//! bucket.

use crate::config::RateLimitConfig;
use crate::error::EnforceError;
use crate::metrics;
use crate::types::GroupId;
use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Type alias for governor's direct rate limiter.
type DirectRateLimiter = governor::DefaultDirectRateLimiter;

const MAX_CHAT_LIMITERS: usize = 10_000;

/// Thread-safe two-level action rate limiter.
pub struct ActionRateLimiter {
    /// Bot-wide bucket.
    global: DirectRateLimiter,
    /// Per-chat buckets, created on first use.
    per_chat: DashMap<GroupId, Arc<DirectRateLimiter>>,
    per_chat_quota: Quota,
    acquire_timeout: Duration,
}

impl ActionRateLimiter {
    /// Create a limiter from configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        let global_rate =
            NonZeroU32::new(config.global_per_second).unwrap_or(nonzero!(30u32));
        let chat_rate =
            NonZeroU32::new(config.per_chat_per_second).unwrap_or(nonzero!(1u32));
        let chat_burst = NonZeroU32::new(config.per_chat_burst).unwrap_or(nonzero!(3u32));

        Self {
            global: RateLimiter::direct(Quota::per_second(global_rate)),
            per_chat: DashMap::new(),
            per_chat_quota: Quota::per_second(chat_rate).allow_burst(chat_burst),
            acquire_timeout: config.acquire_timeout(),
        }
    }

    /// Acquire `weight` tokens, waiting up to the configured bound.
    ///
    /// With a chat scope, tokens are taken from the chat bucket before the
    /// global one. Returns `RateLimitExceeded` when the bound elapses or
    /// when `weight` exceeds a bucket's capacity outright.
    pub async fn acquire(&self, chat: Option<GroupId>, weight: u32) -> Result<(), EnforceError> {
        let Some(weight) = NonZeroU32::new(weight) else {
            return Ok(());
        };

        let scope = match chat {
            Some(id) => id.to_string(),
            None => "global".to_string(),
        };
        let chat_limiter = chat.map(|id| self.chat_limiter(id));

        let wait = async {
            if let Some(limiter) = &chat_limiter {
                limiter.until_n_ready(weight).await?;
            }
            self.global.until_n_ready(weight).await
        };

        match tokio::time::timeout(self.acquire_timeout, wait).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => {
                metrics::record_rate_limited(&scope);
                debug!(scope = %scope, weight, "rate limit acquire failed");
                Err(EnforceError::RateLimitExceeded { scope })
            }
        }
    }

    /// Number of live per-chat buckets.
    pub fn chat_bucket_count(&self) -> usize {
        self.per_chat.len()
    }

    /// Cleanup to prevent unbounded growth of per-chat buckets.
    ///
    /// Called periodically from the maintenance task.
    pub fn cleanup(&self) {
        if self.per_chat.len() > MAX_CHAT_LIMITERS {
            self.per_chat.clear();
            debug!(
                "cleared per-chat rate limiters (exceeded {} entries)",
                MAX_CHAT_LIMITERS
            );
        }
    }

    /// Clone out the chat bucket so no map guard is held across an await.
    fn chat_limiter(&self, chat: GroupId) -> Arc<DirectRateLimiter> {
        let entry = self
            .per_chat
            .entry(chat)
            .or_insert_with(|| Arc::new(RateLimiter::direct(self.per_chat_quota)));
        Arc::clone(entry.value())
    }
}

impl Default for ActionRateLimiter {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}
