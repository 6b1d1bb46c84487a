//! TTL-bounded verification cache for (user, channel) membership results.
//!
//! Bounded by LRU capacity; expiry is checked at lookup time (lazy
//! expiration). Expired entries are kept until evicted so the verifier
//! can fall back to a stale value during provider outages.

use crate::types::{ChannelId, UserId};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// A cached membership result with its freshness window.
#[derive(Debug, Clone, Copy)]
pub struct MembershipRecord {
    /// Whether the user satisfied the membership requirement.
    pub member: bool,
    /// When the live check produced this record.
    pub checked_at: Instant,
    /// Freshness window; normal for live results, short for negatives
    /// produced by a forced re-check.
    pub ttl: Duration,
}

impl MembershipRecord {
    /// Whether the record is still within its declared TTL.
    #[inline]
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.checked_at) < self.ttl
    }
}

/// Result of a cache lookup: the record plus whether it is still fresh.
#[derive(Debug, Clone, Copy)]
pub struct CacheHit {
    pub record: MembershipRecord,
    pub fresh: bool,
}

/// LRU + TTL cache of membership records.
///
/// A single lock over the LRU keeps writes for the same key atomic; it is
/// held only for map operations, never across an `.await`.
#[derive(Debug)]
pub struct VerificationCache {
    inner: Mutex<LruCache<(UserId, ChannelId), MembershipRecord>>,
}

impl VerificationCache {
    /// Create a cache bounded to `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up the record for (user, channel), labeling its freshness.
    ///
    /// Promotes the entry in LRU order. Expired entries are returned with
    /// `fresh = false` rather than dropped; the caller decides whether a
    /// stale read is acceptable.
    pub fn lookup(&self, user: UserId, channel: ChannelId) -> Option<CacheHit> {
        let now = Instant::now();
        let mut cache = self.inner.lock();
        cache.get(&(user, channel)).map(|record| CacheHit {
            record: *record,
            fresh: record.is_fresh(now),
        })
    }

    /// Write-through a live result with the given TTL.
    pub fn put(&self, user: UserId, channel: ChannelId, member: bool, ttl: Duration) {
        let record = MembershipRecord {
            member,
            checked_at: Instant::now(),
            ttl,
        };
        self.inner.lock().put((user, channel), record);
    }

    /// Drop the entry for (user, channel) so the next lookup goes live.
    ///
    /// Triggered by a forced re-check and by observed "left channel"
    /// signals from the update source.
    pub fn invalidate(&self, user: UserId, channel: ChannelId) {
        self.inner.lock().pop(&(user, channel));
    }

    /// Number of cached entries (fresh and stale).
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
