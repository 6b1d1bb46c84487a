//! Per-(group, user) restriction state machine.
//!
//! States: ALLOWED (implicit, no entry) and RESTRICTED. Valid transitions:
//!
//! ```text
//! ALLOWED ──violation──► RESTRICTED ──violation──► RESTRICTED (idempotent)
//!                        RESTRICTED ──re-check ok──► ALLOWED
//! ```
//!
//! All operations on one key are linearizable: the arena is a fixed-size
//! array of mutex-guarded shards keyed by a hash of (group, user), so the
//! lock count is bounded independent of population size and a concurrent
//! message-driven restrict and callback-driven reinstate for the same
//! user never interleave inconsistently.

use crate::error::EnforceError;
use crate::metrics;
use crate::types::{ChannelId, GroupId, MessageId, UserId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::{Duration, Instant};
use tracing::debug;

const SHARD_COUNT: usize = 64;

/// Observable state of a (group, user) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictionState {
    Allowed,
    Restricted,
}

/// Stored state for a restricted user. Absence of an entry is ALLOWED.
#[derive(Debug, Clone)]
pub struct RestrictionEntry {
    /// Handle to the outstanding warning message, if one was dispatched.
    /// At most one exists per (group, user) at any instant.
    pub warning_ref: Option<MessageId>,
    /// Channels unmet at the last violation.
    pub missing_channels: Vec<ChannelId>,
    /// Last time a violating message was observed.
    pub last_violation_at: Instant,
    /// Last time a warning dispatch was granted for this entry.
    pub last_dispatch_at: Instant,
}

/// Result of a `restrict` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictOutcome {
    /// Whether the caller should dispatch mute + warning. `false` inside
    /// the cool-down window: the transition happened (idempotently) but a
    /// duplicate dispatch must be suppressed.
    pub is_new: bool,
    /// A previously outstanding warning that the caller must clean up
    /// before dispatching a replacement. Set only when `is_new` is true.
    pub stale_warning: Option<MessageId>,
}

/// Result of storing a warning handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningRefOutcome {
    /// The handle was stored on the restricted entry.
    Stored,
    /// The user was reinstated while the warning was in flight; the caller
    /// should delete the message it just sent.
    NotRestricted,
}

/// Sharded store of restriction entries.
pub struct RestrictionStore {
    shards: Box<[Mutex<HashMap<(GroupId, UserId), RestrictionEntry>>]>,
    cooldown: Duration,
}

impl RestrictionStore {
    pub fn new(cooldown: Duration) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards, cooldown }
    }

    fn shard(&self, group: GroupId, user: UserId) -> &Mutex<HashMap<(GroupId, UserId), RestrictionEntry>> {
        let mut hasher = DefaultHasher::new();
        (group, user).hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Transition to RESTRICTED for a detected violation.
    ///
    /// First violation creates the entry and grants a dispatch. Repeat
    /// violations inside the cool-down window are idempotent and suppress
    /// the dispatch; outside the window a fresh dispatch is granted and
    /// any previous warning handle is handed back for cleanup, keeping at
    /// most one outstanding.
    pub fn restrict(
        &self,
        group: GroupId,
        user: UserId,
        missing_channels: Vec<ChannelId>,
    ) -> RestrictOutcome {
        use std::collections::hash_map::Entry;

        let now = Instant::now();
        let mut shard = self.shard(group, user).lock();

        let (outcome, created) = match shard.entry((group, user)) {
            Entry::Vacant(vacant) => {
                vacant.insert(RestrictionEntry {
                    warning_ref: None,
                    missing_channels,
                    last_violation_at: now,
                    last_dispatch_at: now,
                });
                (
                    RestrictOutcome {
                        is_new: true,
                        stale_warning: None,
                    },
                    true,
                )
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.last_violation_at = now;
                entry.missing_channels = missing_channels;
                let outcome = if now.duration_since(entry.last_dispatch_at) < self.cooldown {
                    RestrictOutcome {
                        is_new: false,
                        stale_warning: None,
                    }
                } else {
                    entry.last_dispatch_at = now;
                    RestrictOutcome {
                        is_new: true,
                        stale_warning: entry.warning_ref.take(),
                    }
                };
                (outcome, false)
            }
        };
        drop(shard);

        if created {
            metrics::update_restricted_gauge(self.restricted_count() as i64);
            debug!(%group, %user, "user restricted");
        }
        outcome
    }

    /// Transition to ALLOWED after a successful re-verification.
    ///
    /// Returns the removed entry (its `warning_ref` is the message to
    /// clean up), or `None` if the user was already ALLOWED.
    pub fn reinstate(&self, group: GroupId, user: UserId) -> Option<RestrictionEntry> {
        let removed = self.shard(group, user).lock().remove(&(group, user));
        if removed.is_some() {
            metrics::update_restricted_gauge(self.restricted_count() as i64);
            debug!(%group, %user, "user reinstated");
        }
        removed
    }

    /// Observable state, defaulting to ALLOWED when no entry exists.
    pub fn get(&self, group: GroupId, user: UserId) -> RestrictionState {
        if self.shard(group, user).lock().contains_key(&(group, user)) {
            RestrictionState::Restricted
        } else {
            RestrictionState::Allowed
        }
    }

    /// Store the handle of a just-sent warning message.
    ///
    /// A handle already present is a violation of the single-warning
    /// invariant and surfaces as `StateConflict` rather than being
    /// silently overwritten.
    pub fn set_warning_ref(
        &self,
        group: GroupId,
        user: UserId,
        message: MessageId,
    ) -> Result<WarningRefOutcome, EnforceError> {
        let mut shard = self.shard(group, user).lock();
        match shard.get_mut(&(group, user)) {
            None => Ok(WarningRefOutcome::NotRestricted),
            Some(entry) => {
                if entry.warning_ref.is_some() {
                    return Err(EnforceError::StateConflict { group, user });
                }
                entry.warning_ref = Some(message);
                Ok(WarningRefOutcome::Stored)
            }
        }
    }

    /// Evict entries with no violation activity for `max_idle`.
    ///
    /// Storage management only; runs from the maintenance task.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            shard.retain(|_, entry| {
                let idle = now.duration_since(entry.last_violation_at) < max_idle;
                if !idle {
                    removed += 1;
                }
                idle
            });
        }
        if removed > 0 {
            metrics::update_restricted_gauge(self.restricted_count() as i64);
            debug!(count = removed, "pruned idle restriction entries");
        }
        removed
    }

    /// Number of currently restricted (group, user) pairs.
    pub fn restricted_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}
