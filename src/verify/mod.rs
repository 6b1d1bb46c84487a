//! Membership verification: cache-then-provider resolution.
//!
//! The verifier answers "is this user a member of this channel" from the
//! cache when fresh, otherwise via the live provider (through the rate
//! limiter), writing the result back through the cache. On provider
//! failure an existing entry is served marked stale; only when no entry
//! exists at all does the error propagate.

pub mod cache;

pub use cache::{CacheHit, MembershipRecord, VerificationCache};

use crate::config::VerifyConfig;
use crate::dispatch::ActionRateLimiter;
use crate::error::{EnforceError, PlatformError};
use crate::external::MembershipProvider;
use crate::metrics;
use crate::types::{ChannelId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where a verification result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Fresh cache entry.
    Cache,
    /// Live provider call.
    Live,
    /// Expired cache entry served because the live call failed.
    Stale,
}

impl Source {
    /// Static label for metrics.
    #[inline]
    pub fn label(&self) -> &'static str {
        match self {
            Source::Cache => "hit",
            Source::Live => "miss",
            Source::Stale => "stale",
        }
    }
}

/// A resolved membership check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub member: bool,
    pub source: Source,
}

/// Cache-backed membership verifier.
pub struct Verifier {
    cache: VerificationCache,
    provider: Arc<dyn MembershipProvider>,
    limiter: Arc<ActionRateLimiter>,
    member_ttl: Duration,
    negative_ttl: Duration,
}

impl Verifier {
    pub fn new(
        provider: Arc<dyn MembershipProvider>,
        limiter: Arc<ActionRateLimiter>,
        config: &VerifyConfig,
    ) -> Self {
        Self {
            cache: VerificationCache::new(config.cache_capacity),
            provider,
            limiter,
            member_ttl: config.member_ttl(),
            negative_ttl: config.negative_ttl(),
        }
    }

    /// Resolve membership, preferring a fresh cache entry.
    ///
    /// Fails with `ProviderUnavailable` only when the live call errors and
    /// no cache entry (even stale) exists.
    pub async fn is_member(
        &self,
        user: UserId,
        channel: ChannelId,
    ) -> Result<Verification, EnforceError> {
        if let Some(hit) = self.cache.lookup(user, channel)
            && hit.fresh
        {
            metrics::record_cache_result(Source::Cache.label());
            return Ok(Verification {
                member: hit.record.member,
                source: Source::Cache,
            });
        }

        match self.live_check(user, channel).await {
            Ok(member) => {
                metrics::record_cache_result(Source::Live.label());
                self.cache.put(user, channel, member, self.member_ttl);
                Ok(Verification {
                    member,
                    source: Source::Live,
                })
            }
            Err(err) => {
                metrics::record_provider_error(err.error_code());
                if let Some(hit) = self.cache.lookup(user, channel) {
                    warn!(
                        %user, %channel, error = %err,
                        "provider failed, serving stale membership result"
                    );
                    metrics::record_cache_result(Source::Stale.label());
                    Ok(Verification {
                        member: hit.record.member,
                        source: Source::Stale,
                    })
                } else {
                    Err(EnforceError::ProviderUnavailable(err))
                }
            }
        }
    }

    /// Force a live check, bypassing the cache.
    ///
    /// Used by the callback resolver. Negative results are cached with the
    /// short TTL so a user who joins moments later is re-checked promptly.
    pub async fn check_fresh(
        &self,
        user: UserId,
        channel: ChannelId,
    ) -> Result<Verification, EnforceError> {
        self.cache.invalidate(user, channel);
        let member = self
            .live_check(user, channel)
            .await
            .map_err(|err| {
                metrics::record_provider_error(err.error_code());
                EnforceError::ProviderUnavailable(err)
            })?;

        let ttl = if member {
            self.member_ttl
        } else {
            self.negative_ttl
        };
        self.cache.put(user, channel, member, ttl);
        Ok(Verification {
            member,
            source: Source::Live,
        })
    }

    /// Drop the cached entry for (user, channel) so the next lookup goes
    /// live. Driven by observed "left channel" events.
    pub fn invalidate(&self, user: UserId, channel: ChannelId) {
        self.cache.invalidate(user, channel);
    }

    /// Number of cached membership records.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    async fn live_check(&self, user: UserId, channel: ChannelId) -> Result<bool, PlatformError> {
        // Provider calls count against the platform's aggregate ceiling
        self.limiter
            .acquire(None, 1)
            .await
            .map_err(|_| PlatformError::RateLimited)?;

        let status = self.provider.chat_member(channel, user).await?;
        debug!(%user, %channel, %status, "live membership check");
        Ok(status.is_member())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::types::MemberStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ScriptedProvider {
        status: parking_lot::Mutex<MemberStatus>,
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(status: MemberStatus) -> Self {
            Self {
                status: parking_lot::Mutex::new(status),
                failing: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        fn set_status(&self, status: MemberStatus) {
            *self.status.lock() = status;
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MembershipProvider for ScriptedProvider {
        async fn chat_member(
            &self,
            _channel: ChannelId,
            _user: UserId,
        ) -> Result<MemberStatus, PlatformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(PlatformError::Network("connection reset".into()));
            }
            Ok(*self.status.lock())
        }
    }

    fn verifier_with(provider: Arc<ScriptedProvider>) -> Verifier {
        let limiter = Arc::new(ActionRateLimiter::new(&RateLimitConfig::default()));
        Verifier::new(provider, limiter, &VerifyConfig::default())
    }

    const USER: UserId = UserId(7);
    const CHANNEL: ChannelId = ChannelId(-42);

    #[tokio::test]
    async fn test_provider_called_at_most_once_within_ttl() {
        let provider = Arc::new(ScriptedProvider::new(MemberStatus::Member));
        let verifier = verifier_with(provider.clone());

        let first = verifier.is_member(USER, CHANNEL).await.unwrap();
        assert_eq!(first.source, Source::Live);

        for _ in 0..5 {
            let v = verifier.is_member(USER, CHANNEL).await.unwrap();
            assert!(v.member);
            assert_eq!(v.source, Source::Cache);
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_member_statuses_normalize() {
        for status in [MemberStatus::Left, MemberStatus::Kicked, MemberStatus::Banned] {
            let provider = Arc::new(ScriptedProvider::new(status));
            let verifier = verifier_with(provider);
            let v = verifier.is_member(USER, CHANNEL).await.unwrap();
            assert!(!v.member);
        }
    }

    #[tokio::test]
    async fn test_stale_fallback_on_provider_error() {
        let provider = Arc::new(ScriptedProvider::new(MemberStatus::Member));
        let limiter = Arc::new(ActionRateLimiter::new(&RateLimitConfig::default()));
        let config = VerifyConfig {
            member_ttl_secs: 0, // every cached entry is immediately stale
            ..VerifyConfig::default()
        };
        let verifier = Verifier::new(provider.clone(), limiter, &config);

        verifier.is_member(USER, CHANNEL).await.unwrap();
        provider.set_failing(true);

        let v = verifier.is_member(USER, CHANNEL).await.unwrap();
        assert_eq!(v.source, Source::Stale);
        assert!(v.member);
    }

    #[tokio::test]
    async fn test_provider_unavailable_without_cache() {
        let provider = Arc::new(ScriptedProvider::new(MemberStatus::Member));
        provider.set_failing(true);
        let verifier = verifier_with(provider);

        let err = verifier.is_member(USER, CHANNEL).await.unwrap_err();
        assert!(matches!(err, EnforceError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_check_fresh_bypasses_cache() {
        let provider = Arc::new(ScriptedProvider::new(MemberStatus::Left));
        let verifier = verifier_with(provider.clone());

        // Prime a negative cache entry
        let v = verifier.is_member(USER, CHANNEL).await.unwrap();
        assert!(!v.member);

        // The user joins; a plain is_member would still serve the cache
        provider.set_status(MemberStatus::Member);
        let v = verifier.is_member(USER, CHANNEL).await.unwrap();
        assert_eq!(v.source, Source::Cache);
        assert!(!v.member);

        let v = verifier.check_fresh(USER, CHANNEL).await.unwrap();
        assert_eq!(v.source, Source::Live);
        assert!(v.member);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_fresh_negative_uses_short_ttl() {
        let provider = Arc::new(ScriptedProvider::new(MemberStatus::Left));
        let limiter = Arc::new(ActionRateLimiter::new(&RateLimitConfig::default()));
        let config = VerifyConfig {
            negative_ttl_secs: 0, // short TTL expires immediately for the test
            ..VerifyConfig::default()
        };
        let verifier = Verifier::new(provider.clone(), limiter, &config);

        let v = verifier.check_fresh(USER, CHANNEL).await.unwrap();
        assert!(!v.member);

        // The short-TTL negative is already stale, so the next check goes live
        provider.set_status(MemberStatus::Member);
        let v = verifier.is_member(USER, CHANNEL).await.unwrap();
        assert_eq!(v.source, Source::Live);
        assert!(v.member);
    }

    #[tokio::test]
    async fn test_invalidate_forces_live_lookup() {
        let provider = Arc::new(ScriptedProvider::new(MemberStatus::Member));
        let verifier = verifier_with(provider.clone());

        verifier.is_member(USER, CHANNEL).await.unwrap();
        verifier.invalidate(USER, CHANNEL);
        verifier.is_member(USER, CHANNEL).await.unwrap();
        assert_eq!(provider.calls(), 2);
    }
}
