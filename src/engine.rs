//! The enforcement engine: decision pipeline and callback resolver.
//!
//! One `Engine` per bot instance. The update source feeds it inbound
//! events via [`Engine::handle_update`]; everything outbound goes through
//! the dispatch coordinator so rate limits and queue bounds apply
//! uniformly.
//!
//! The pipeline itself is pure with respect to platform side effects:
//! [`Engine::process_message`] only computes a [`Decision`]. State
//! transitions and dispatches happen in [`Engine::handle_message`].

use crate::config::GateConfig;
use crate::dispatch::{Action, ActionRateLimiter, DispatchCoordinator};
use crate::error::EnforceError;
use crate::external::{ActionDispatcher, ConfigStore, MembershipProvider};
use crate::metrics;
use crate::state::RestrictionStore;
use crate::telemetry::{UpdateTimer, spans};
use crate::types::{Decision, GroupConfig, GroupId, MessageId, SenderRole, UpdateEvent, UserId};
use crate::verify::Verifier;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

/// Maintenance pass interval (state pruning, limiter cleanup).
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

/// Result of an explicit re-verification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub verified: bool,
}

struct CachedGroupConfig {
    fetched_at: Instant,
    config: Option<GroupConfig>,
}

/// Channel membership enforcement engine.
pub struct Engine {
    config_store: Arc<dyn ConfigStore>,
    verifier: Verifier,
    store: Arc<RestrictionStore>,
    coordinator: DispatchCoordinator,
    limiter: Arc<ActionRateLimiter>,
    group_configs: DashMap<GroupId, CachedGroupConfig>,
    config_refresh: Duration,
    state_idle_evict: Duration,
}

impl Engine {
    /// Wire up the engine from configuration and its three collaborators.
    pub fn new(
        config: &GateConfig,
        config_store: Arc<dyn ConfigStore>,
        provider: Arc<dyn MembershipProvider>,
        dispatcher: Arc<dyn ActionDispatcher>,
    ) -> Self {
        let limiter = Arc::new(ActionRateLimiter::new(&config.rate_limit));
        let store = Arc::new(RestrictionStore::new(
            config.enforcement.warning_cooldown(),
        ));
        let verifier = Verifier::new(provider, Arc::clone(&limiter), &config.verify);
        let coordinator = DispatchCoordinator::new(
            dispatcher,
            Arc::clone(&limiter),
            Arc::clone(&store),
            config.rate_limit.queue_depth,
        );

        Self {
            config_store,
            verifier,
            store,
            coordinator,
            limiter,
            group_configs: DashMap::new(),
            config_refresh: config.enforcement.config_refresh(),
            state_idle_evict: config.enforcement.state_idle_evict(),
        }
    }

    /// Process one inbound event from the update source.
    pub async fn handle_update(&self, update: UpdateEvent) {
        let _timer = UpdateTimer::new(update.kind());
        match update {
            UpdateEvent::Message {
                group,
                user,
                message,
                role,
            } => {
                self.handle_message(group, user, message, role)
                    .instrument(spans::update("message", group, user))
                    .await;
            }
            UpdateEvent::VerifyCallback {
                group,
                user,
                callback_id,
            } => {
                self.handle_verify_callback(group, user, &callback_id)
                    .instrument(spans::update("verify_callback", group, user))
                    .await;
            }
        }
    }

    /// Run the decision pipeline for one message. No side effects on the
    /// platform; the caller dispatches according to the decision.
    pub async fn process_message(
        &self,
        group: GroupId,
        user: UserId,
        role: SenderRole,
    ) -> Decision {
        let decision = self.decide(group, user, role).await;
        metrics::record_decision(decision.label());
        decision
    }

    /// Full message flow: decide, transition restriction state, dispatch.
    pub async fn handle_message(
        &self,
        group: GroupId,
        user: UserId,
        message: MessageId,
        role: SenderRole,
    ) -> Decision {
        let decision = self.process_message(group, user, role).await;

        if let Decision::RestrictAndWarn { missing } = &decision {
            let outcome = self.store.restrict(group, user, missing.clone());
            if outcome.is_new {
                info!(%group, %user, missing = ?missing, "restricting member");
                if let Some(stale) = outcome.stale_warning {
                    self.coordinator
                        .enqueue(group, Action::CleanupWarning { message: stale });
                }
                self.coordinator
                    .enqueue(group, Action::DeleteMessage { message });
                self.coordinator.enqueue(group, Action::Mute { user });
                self.coordinator.enqueue(
                    group,
                    Action::SendWarning {
                        user,
                        missing: missing.clone(),
                    },
                );
            } else {
                // Cool-down window: the state transition is idempotent and
                // the duplicate dispatch is suppressed
                debug!(%group, %user, "repeat violation inside cool-down, no dispatch");
            }
        }
        decision
    }

    /// Resolve an explicit re-verification request.
    ///
    /// All verifier checks bypass the cache; a fresh negative is cached
    /// with the short TTL so a retry right after joining resolves quickly.
    pub async fn handle_verify_callback(
        &self,
        group: GroupId,
        user: UserId,
        callback_id: &str,
    ) -> VerifyOutcome {
        let Some(config) = self.enabled_config(group).await else {
            // Nothing to enforce here; lift any leftover restriction
            self.lift_restriction(group, user);
            self.coordinator
                .answer_callback(callback_id, "Verification is not required here.", false)
                .await;
            return VerifyOutcome { verified: true };
        };

        for channel in &config.required_channels {
            match self.verifier.check_fresh(user, *channel).await {
                Ok(v) if v.member => continue,
                Ok(_) => {
                    debug!(%group, %user, %channel, "re-verification failed, still missing");
                    self.coordinator
                        .answer_callback(
                            callback_id,
                            "You have not joined all required channels yet.",
                            true,
                        )
                        .await;
                    return VerifyOutcome { verified: false };
                }
                Err(err) => {
                    warn!(%group, %user, %channel, error = %err, "re-verification unavailable");
                    self.coordinator
                        .answer_callback(
                            callback_id,
                            "Verification is temporarily unavailable, please try again.",
                            true,
                        )
                        .await;
                    return VerifyOutcome { verified: false };
                }
            }
        }

        info!(%group, %user, "re-verification passed, reinstating");
        self.lift_restriction(group, user);
        self.coordinator
            .answer_callback(callback_id, "Verified, welcome back!", false)
            .await;
        VerifyOutcome { verified: true }
    }

    /// Feed an observed "member left channel" signal into the cache.
    pub fn observe_channel_leave(&self, user: UserId, channel: crate::types::ChannelId) {
        self.verifier.invalidate(user, channel);
    }

    /// Current restriction state for a (group, user) pair.
    pub fn restriction_state(&self, group: GroupId, user: UserId) -> crate::state::RestrictionState {
        self.store.get(group, user)
    }

    /// Spawn the periodic maintenance task (idle-state pruning and rate
    /// limiter cleanup).
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let limiter = Arc::clone(&self.limiter);
        let idle = self.state_idle_evict;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                interval.tick().await;
                store.prune_idle(idle);
                limiter.cleanup();
            }
        })
    }

    async fn decide(&self, group: GroupId, user: UserId, role: SenderRole) -> Decision {
        let Some(config) = self.enabled_config(group).await else {
            return Decision::Ignore;
        };

        // Admin bypass: no membership checks at all
        if role.is_admin() || config.admin_ids.contains(&user) {
            return Decision::Allow;
        }

        async {
            let mut unresolved = 0usize;
            for channel in &config.required_channels {
                match self.verifier.is_member(user, *channel).await {
                    Ok(v) if v.member => continue,
                    // Short-circuit on the first definite failure
                    Ok(_) => {
                        return Decision::RestrictAndWarn {
                            missing: vec![*channel],
                        };
                    }
                    Err(EnforceError::ProviderUnavailable(_)) => unresolved += 1,
                    Err(err) => {
                        warn!(%group, %user, %channel, error = %err, "verification error");
                        unresolved += 1;
                    }
                }
            }

            if unresolved > 0 {
                // Fail-open: no channel produced a definite negative, so do
                // not restrict on uncertainty during a provider outage
                warn!(%group, %user, unresolved, "provider outage, failing open");
                metrics::record_degraded_mode();
            }
            Decision::Allow
        }
        .instrument(spans::verification(group, user))
        .await
    }

    /// Group config through the short-TTL read-through cache, filtered to
    /// enabled groups with at least one requirement.
    async fn enabled_config(&self, group: GroupId) -> Option<GroupConfig> {
        let config = self.group_config(group).await?;
        if !config.enabled || config.required_channels.is_empty() {
            return None;
        }
        Some(config)
    }

    async fn group_config(&self, group: GroupId) -> Option<GroupConfig> {
        // Clone out so no map guard lives across the await below
        let cached: Option<Option<GroupConfig>> = self.group_configs.get(&group).and_then(|c| {
            (c.fetched_at.elapsed() < self.config_refresh).then(|| c.config.clone())
        });
        if let Some(config) = cached {
            return config;
        }

        match self.config_store.group_config(group).await {
            Ok(config) => {
                self.group_configs.insert(
                    group,
                    CachedGroupConfig {
                        fetched_at: Instant::now(),
                        config: config.clone(),
                    },
                );
                config
            }
            Err(err) => {
                // Stale config beats no config during a store outage
                warn!(%group, error = %err, "config store error, using last known config");
                self.group_configs.get(&group).and_then(|c| c.config.clone())
            }
        }
    }

    fn lift_restriction(&self, group: GroupId, user: UserId) {
        if let Some(entry) = self.store.reinstate(group, user) {
            self.coordinator.enqueue(group, Action::Unmute { user });
            if let Some(warning) = entry.warning_ref {
                self.coordinator
                    .enqueue(group, Action::CleanupWarning { message: warning });
            }
        }
    }
}
