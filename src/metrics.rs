//! Prometheus metrics collection for changuard.
//!
//! One observability event per processed update: decision taken, cache
//! hit/miss/stale, latency, degraded-mode and rate-limit flags. Exposed
//! through [`gather_metrics`] for whatever HTTP surface the host embeds.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters (monotonic increasing)
// ========================================================================

/// Enforcement decisions by outcome (allow / restrict_and_warn / ignore).
pub static DECISIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Verification cache lookups by result (hit / miss / stale).
pub static VERIFY_CACHE: OnceLock<IntCounterVec> = OnceLock::new();

/// Membership provider call failures by error code.
pub static PROVIDER_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Pipeline fail-open events during provider outages.
pub static DEGRADED_MODE: OnceLock<IntCounter> = OnceLock::new();

/// Warning messages successfully dispatched.
pub static WARNINGS_DISPATCHED: OnceLock<IntCounter> = OnceLock::new();

/// Actions shed before reaching the platform, by reason.
pub static ACTIONS_DROPPED: OnceLock<IntCounterVec> = OnceLock::new();

/// Rate limiter acquire failures by bucket scope.
pub static RATE_LIMITED: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges
// ========================================================================

/// Currently restricted (group, user) pairs.
pub static RESTRICTED_USERS: OnceLock<IntGauge> = OnceLock::new();

// ========================================================================
// Histograms
// ========================================================================

/// Update processing latency by update kind.
pub static UPDATE_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Call once at startup before updates are processed. All record helpers
/// are no-ops until then, so the engine is usable without metrics.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(
        DECISIONS,
        IntCounterVec::new(
            Opts::new("changuard_decisions_total", "Enforcement decisions by outcome"),
            &["decision"]
        )
    );
    register!(
        VERIFY_CACHE,
        IntCounterVec::new(
            Opts::new("changuard_verify_cache_total", "Verification cache lookups by result"),
            &["result"]
        )
    );
    register!(
        PROVIDER_ERRORS,
        IntCounterVec::new(
            Opts::new("changuard_provider_errors_total", "Membership provider failures by code"),
            &["error"]
        )
    );
    register!(
        DEGRADED_MODE,
        IntCounter::new("changuard_degraded_mode_total", "Fail-open decisions during provider outages")
    );
    register!(
        WARNINGS_DISPATCHED,
        IntCounter::new("changuard_warnings_dispatched_total", "Warning messages dispatched")
    );
    register!(
        ACTIONS_DROPPED,
        IntCounterVec::new(
            Opts::new("changuard_actions_dropped_total", "Actions shed before dispatch by reason"),
            &["reason"]
        )
    );
    register!(
        RATE_LIMITED,
        IntCounterVec::new(
            Opts::new("changuard_rate_limited_total", "Rate limiter acquire failures by scope"),
            &["scope"]
        )
    );
    register!(
        RESTRICTED_USERS,
        IntGauge::new("changuard_restricted_users", "Currently restricted (group, user) pairs")
    );
    register!(
        UPDATE_LATENCY,
        HistogramVec::new(
            HistogramOpts::new("changuard_update_duration_seconds", "Update processing latency by kind")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["kind"]
        )
    );
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Record helpers
// ============================================================================

/// Record an enforcement decision.
#[inline]
pub fn record_decision(decision: &str) {
    if let Some(c) = DECISIONS.get() {
        c.with_label_values(&[decision]).inc();
    }
}

/// Record a verification cache lookup result.
#[inline]
pub fn record_cache_result(result: &str) {
    if let Some(c) = VERIFY_CACHE.get() {
        c.with_label_values(&[result]).inc();
    }
}

/// Record a membership provider failure.
#[inline]
pub fn record_provider_error(error: &str) {
    if let Some(c) = PROVIDER_ERRORS.get() {
        c.with_label_values(&[error]).inc();
    }
}

/// Record a fail-open decision taken during a provider outage.
#[inline]
pub fn record_degraded_mode() {
    if let Some(c) = DEGRADED_MODE.get() {
        c.inc();
    }
}

/// Record a dispatched warning message.
#[inline]
pub fn record_warning_dispatched() {
    if let Some(c) = WARNINGS_DISPATCHED.get() {
        c.inc();
    }
}

/// Record an action shed before dispatch.
#[inline]
pub fn record_action_dropped(reason: &str) {
    if let Some(c) = ACTIONS_DROPPED.get() {
        c.with_label_values(&[reason]).inc();
    }
}

/// Record a rate limiter acquire failure.
///
/// Per-chat scopes collapse to "chat" to keep label cardinality bounded.
#[inline]
pub fn record_rate_limited(scope: &str) {
    if let Some(c) = RATE_LIMITED.get() {
        let label = if scope == "global" { "global" } else { "chat" };
        c.with_label_values(&[label]).inc();
    }
}

/// Update the restricted users gauge.
#[inline]
pub fn update_restricted_gauge(count: i64) {
    if let Some(g) = RESTRICTED_USERS.get() {
        g.set(count);
    }
}

/// Record update processing latency.
#[inline]
pub fn record_update(kind: &str, duration_secs: f64) {
    if let Some(h) = UPDATE_LATENCY.get() {
        h.with_label_values(&[kind]).observe(duration_secs);
    }
}
