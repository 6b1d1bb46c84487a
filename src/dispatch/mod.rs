//! Outbound action plumbing: rate limiting and per-chat dispatch queues.

pub mod queue;
pub mod rate_limit;

pub use queue::{Action, DispatchCoordinator, VERIFY_CALLBACK_DATA};
pub use rate_limit::ActionRateLimiter;
