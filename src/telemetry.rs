//! Telemetry utilities for update timing and correlation.

use std::time::Instant;

/// Guard for timing update processing and recording metrics.
///
/// Records update latency when dropped.
pub struct UpdateTimer {
    kind: &'static str,
    start: Instant,
}

impl UpdateTimer {
    /// Start timing an update of the given kind.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            start: Instant::now(),
        }
    }
}

impl Drop for UpdateTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_update(self.kind, duration);
    }
}

/// Standardized span constructors for enforcement observability.
pub mod spans {
    use crate::types::{GroupId, UserId};
    use tracing::{Span, info_span};

    /// Create a span for one processed update.
    pub fn update(kind: &str, group: GroupId, user: UserId) -> Span {
        info_span!("update", kind = %kind, group = %group, user = %user)
    }

    /// Create a span for a membership verification pass.
    pub fn verification(group: GroupId, user: UserId) -> Span {
        info_span!("verification", group = %group, user = %user)
    }
}
