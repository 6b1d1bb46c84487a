//! Configuration loading and management.
//!
//! All tunables the engine honors: verification cache TTLs and capacity,
//! enforcement cool-down and config refresh intervals, rate limiter
//! quotas and queue bounds. Loaded from TOML; every field has a default
//! so an empty file is a valid configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GateConfig {
    /// Membership verification and cache tuning.
    #[serde(default)]
    pub verify: VerifyConfig,
    /// Restriction state and pipeline tuning.
    #[serde(default)]
    pub enforcement: EnforcementConfig,
    /// Outbound action rate limits and queue bounds.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl GateConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: GateConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Membership verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyConfig {
    /// TTL for cached membership results, seconds (default: 600).
    #[serde(default = "default_member_ttl_secs")]
    pub member_ttl_secs: u64,
    /// Short TTL for negatives produced by a forced re-check, seconds
    /// (default: 30). Keeps a just-joined user from being penalized by a
    /// long-lived stale negative.
    #[serde(default = "default_negative_ttl_secs")]
    pub negative_ttl_secs: u64,
    /// Bounded capacity of the verification cache (default: 10000).
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl VerifyConfig {
    pub fn member_ttl(&self) -> Duration {
        Duration::from_secs(self.member_ttl_secs)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            member_ttl_secs: default_member_ttl_secs(),
            negative_ttl_secs: default_negative_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Enforcement pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EnforcementConfig {
    /// Minimum interval between duplicate warning dispatches for the same
    /// restricted user, seconds (default: 30).
    #[serde(default = "default_warning_cooldown_secs")]
    pub warning_cooldown_secs: u64,
    /// Group config read-through cache refresh interval, seconds
    /// (default: 60).
    #[serde(default = "default_config_refresh_secs")]
    pub config_refresh_secs: u64,
    /// Restriction entries idle longer than this are evicted by the
    /// maintenance task, seconds (default: 7 days).
    #[serde(default = "default_state_idle_evict_secs")]
    pub state_idle_evict_secs: u64,
}

impl EnforcementConfig {
    pub fn warning_cooldown(&self) -> Duration {
        Duration::from_secs(self.warning_cooldown_secs)
    }

    pub fn config_refresh(&self) -> Duration {
        Duration::from_secs(self.config_refresh_secs)
    }

    pub fn state_idle_evict(&self) -> Duration {
        Duration::from_secs(self.state_idle_evict_secs)
    }
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            warning_cooldown_secs: default_warning_cooldown_secs(),
            config_refresh_secs: default_config_refresh_secs(),
            state_idle_evict_secs: default_state_idle_evict_secs(),
        }
    }
}

/// Outbound action rate limit configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Bot-wide action ceiling, tokens per second (default: 30).
    #[serde(default = "default_global_per_second")]
    pub global_per_second: u32,
    /// Per-chat sustained rate, tokens per second (default: 1).
    #[serde(default = "default_per_chat_per_second")]
    pub per_chat_per_second: u32,
    /// Per-chat burst allowance (default: 3).
    #[serde(default = "default_per_chat_burst")]
    pub per_chat_burst: u32,
    /// Bounded wait before an acquire fails, milliseconds (default: 5000).
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Per-chat action queue depth; the oldest entry is dropped once full
    /// (default: 50).
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl RateLimitConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_second: default_global_per_second(),
            per_chat_per_second: default_per_chat_per_second(),
            per_chat_burst: default_per_chat_burst(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            queue_depth: default_queue_depth(),
        }
    }
}

fn default_member_ttl_secs() -> u64 {
    600
}

fn default_negative_ttl_secs() -> u64 {
    30
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_warning_cooldown_secs() -> u64 {
    30
}

fn default_config_refresh_secs() -> u64 {
    60
}

fn default_state_idle_evict_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_global_per_second() -> u32 {
    30
}

fn default_per_chat_per_second() -> u32 {
    1
}

fn default_per_chat_burst() -> u32 {
    3
}

fn default_acquire_timeout_ms() -> u64 {
    5000
}

fn default_queue_depth() -> usize {
    50
}
