//! Trait seams for the engine's external collaborators.
//!
//! The engine is transport-agnostic: the configuration store, the
//! membership provider and the action dispatcher are all platform
//! adapters injected at construction. The update source is the sole
//! caller of [`Engine::handle_update`](crate::engine::Engine::handle_update).

use crate::error::PlatformError;
use crate::types::{Button, ChannelId, ChatPermissions, GroupConfig, GroupId, MemberStatus, MessageId, UserId};
use async_trait::async_trait;

/// Read access to per-group enforcement configuration.
///
/// The engine wraps this in a short-TTL read-through cache, so
/// implementations may hit a database directly without per-message cost.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the configuration for a group. `Ok(None)` means the group is
    /// unconfigured and enforcement is skipped.
    async fn group_config(&self, group: GroupId) -> Result<Option<GroupConfig>, PlatformError>;
}

/// Resolves live channel membership via the platform's member lookup.
///
/// Subject to the platform's own rate ceiling; the engine routes every
/// call through its rate limiter before invoking this.
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    /// Query the platform for `user`'s status in `channel`.
    async fn chat_member(
        &self,
        channel: ChannelId,
        user: UserId,
    ) -> Result<MemberStatus, PlatformError>;
}

/// Executes platform actions on behalf of the engine.
///
/// Invoked only after a successful rate-limiter acquire. Failures are
/// downgraded to warnings at the call site; implementations should not
/// retry internally.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Delete a message from a chat.
    async fn delete_message(&self, chat: GroupId, message: MessageId)
    -> Result<(), PlatformError>;

    /// Apply send permissions to a member (mute or unmute).
    async fn restrict_member(
        &self,
        chat: GroupId,
        user: UserId,
        permissions: ChatPermissions,
    ) -> Result<(), PlatformError>;

    /// Send a message with optional inline buttons. Returns the id of the
    /// sent message, which the engine keeps as the warning handle.
    async fn send_message(
        &self,
        chat: GroupId,
        text: &str,
        buttons: &[Button],
    ) -> Result<MessageId, PlatformError>;

    /// Answer a callback query with an ephemeral notice.
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: &str,
        alert: bool,
    ) -> Result<(), PlatformError>;
}
