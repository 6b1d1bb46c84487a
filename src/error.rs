//! Unified error handling for changuard.
//!
//! Two layers: `PlatformError` for failures coming back from the chat
//! platform (provider lookups and dispatched actions), and `EnforceError`
//! for the engine's own taxonomy. Every variant carries a static
//! `error_code()` for metric labeling.

use crate::types::{GroupId, UserId};
use thiserror::Error;

/// Failure of an outbound platform call (membership lookup or action).
///
/// These are externally caused; the engine downgrades them to warnings at
/// the dispatcher boundary and they never surface as pipeline errors.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("network error: {0}")]
    Network(String),

    #[error("platform rejected the call: {0}")]
    Rejected(String),

    /// The target message, chat, or user no longer exists.
    #[error("target not found: {0}")]
    NotFound(String),

    /// The local rate limiter refused the call within its wait bound.
    #[error("local rate limit exhausted")]
    RateLimited,
}

impl PlatformError {
    /// Static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Rejected(_) => "rejected",
            Self::NotFound(_) => "not_found",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// Errors raised by the enforcement engine itself.
#[derive(Debug, Error)]
pub enum EnforceError {
    /// The live membership call failed and no cache entry (even stale)
    /// exists. The pipeline fails open on this.
    #[error("membership provider unavailable")]
    ProviderUnavailable(#[source] PlatformError),

    /// A dispatch could not acquire tokens within the bounded wait.
    #[error("rate limit exceeded for {scope}")]
    RateLimitExceeded {
        /// "global" or the chat id the per-chat bucket belongs to.
        scope: String,
    },

    /// The group has no configuration. The pipeline itself maps a missing
    /// config straight to `Decision::Ignore`; this variant is the taxonomy
    /// slot for host adapters that need to surface the condition as an
    /// error (e.g. an admin command targeting an ungated group).
    #[error("no configuration for group {0}")]
    ConfigNotFound(GroupId),

    /// A concurrent transition violated the store's consistency check,
    /// e.g. a second warning ref for one user. Retried once, then fatal.
    #[error("conflicting restriction state for group {group} user {user}")]
    StateConflict { group: GroupId, user: UserId },
}

impl EnforceError {
    /// Static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::ConfigNotFound(_) => "config_not_found",
            Self::StateConflict { .. } => "state_conflict",
        }
    }
}
