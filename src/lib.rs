//! changuard - channel membership enforcement for gated group chats.
//!
//! Gates participation in a group chat on proof of membership in one or
//! more designated channels. Each inbound message runs through a decision
//! pipeline backed by a TTL-bounded verification cache; violators are
//! driven through a per-user restriction state machine with idempotent
//! re-verification, and every outbound platform action passes a
//! two-level token-bucket rate limiter with bounded per-chat queues.
//!
//! The crate is transport-agnostic. Hosts implement three seams
//! ([`ConfigStore`], [`MembershipProvider`] and [`ActionDispatcher`]) and
//! feed [`UpdateEvent`]s into the [`Engine`]:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use changuard::{Engine, GateConfig, UpdateEvent, SenderRole};
//! # use changuard::{ConfigStore, MembershipProvider, ActionDispatcher};
//! # async fn run(
//! #     config_store: Arc<dyn ConfigStore>,
//! #     provider: Arc<dyn MembershipProvider>,
//! #     dispatcher: Arc<dyn ActionDispatcher>,
//! # ) {
//! let config = GateConfig::load("changuard.toml").unwrap_or_default();
//! let engine = Engine::new(&config, config_store, provider, dispatcher);
//! engine.spawn_maintenance();
//!
//! engine
//!     .handle_update(UpdateEvent::Message {
//!         group: (-1001).into(),
//!         user: 42.into(),
//!         message: 7.into(),
//!         role: SenderRole::Member,
//!     })
//!     .await;
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod external;
pub mod metrics;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod verify;

pub use config::{ConfigError, GateConfig};
pub use engine::{Engine, VerifyOutcome};
pub use error::{EnforceError, PlatformError};
pub use external::{ActionDispatcher, ConfigStore, MembershipProvider};
pub use types::{
    Button, ChannelId, ChatPermissions, Decision, GroupConfig, GroupId, MemberStatus, MessageId,
    SenderRole, UpdateEvent, UserId,
};
