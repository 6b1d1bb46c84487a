//! Core identifier and domain types shared across the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

id_type!(
    /// A gated group chat.
    GroupId
);
id_type!(
    /// A platform user.
    UserId
);
id_type!(
    /// A channel whose membership gates a group.
    ChannelId
);
id_type!(
    /// A platform message. Used as the opaque handle to an outstanding warning.
    MessageId
);

/// Role of the sender of an inbound message, as reported by the update source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderRole {
    /// Ordinary group member; membership checks apply.
    Member,
    /// Administrator of the group; bypasses membership checks.
    GroupAdmin,
    /// Administrator of a required channel; bypasses membership checks.
    ChannelAdmin,
}

impl SenderRole {
    /// Admin roles skip enforcement entirely.
    #[inline]
    pub fn is_admin(&self) -> bool {
        matches!(self, SenderRole::GroupAdmin | SenderRole::ChannelAdmin)
    }
}

/// Channel membership status as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Left,
    Kicked,
    Banned,
}

impl MemberStatus {
    /// Whether this status satisfies a membership requirement.
    #[inline]
    pub fn is_member(&self) -> bool {
        matches!(
            self,
            MemberStatus::Creator | MemberStatus::Administrator | MemberStatus::Member
        )
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberStatus::Creator => "creator",
            MemberStatus::Administrator => "administrator",
            MemberStatus::Member => "member",
            MemberStatus::Left => "left",
            MemberStatus::Kicked => "kicked",
            MemberStatus::Banned => "banned",
        };
        write!(f, "{}", s)
    }
}

/// Per-group enforcement configuration, owned by the external config store.
///
/// The engine reads this through a short-TTL cache; it never writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// The group this configuration applies to.
    pub group: GroupId,
    /// Whether enforcement is active for the group.
    pub enabled: bool,
    /// Channels the sender must be a member of, in check order.
    pub required_channels: Vec<ChannelId>,
    /// Users with admin bypass in addition to the sender-role hint.
    #[serde(default)]
    pub admin_ids: Vec<UserId>,
}

/// Outcome of running the enforcement pipeline over one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Sender satisfies all requirements (or bypasses them).
    Allow,
    /// Sender fails at least one requirement; carries the unmet channels.
    RestrictAndWarn { missing: Vec<ChannelId> },
    /// Group is unconfigured or disabled; nothing to enforce.
    Ignore,
}

impl Decision {
    /// Static label for metrics.
    #[inline]
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::RestrictAndWarn { .. } => "restrict_and_warn",
            Decision::Ignore => "ignore",
        }
    }
}

/// An inbound event delivered by the update source.
///
/// Kinds are dispatched exhaustively; adding a variant is a compile error
/// at every match site until handled.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    /// A message posted in a gated group.
    Message {
        group: GroupId,
        user: UserId,
        message: MessageId,
        role: SenderRole,
    },
    /// An explicit re-verification request (the "I've joined" button).
    VerifyCallback {
        group: GroupId,
        user: UserId,
        callback_id: String,
    },
}

impl UpdateEvent {
    /// Static kind label for metrics.
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateEvent::Message { .. } => "message",
            UpdateEvent::VerifyCallback { .. } => "verify_callback",
        }
    }
}

/// Send permissions applied when muting or unmuting a group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatPermissions {
    pub can_send_messages: bool,
}

impl ChatPermissions {
    /// Permissions for a restricted member.
    pub fn muted() -> Self {
        Self {
            can_send_messages: false,
        }
    }

    /// Permissions restored on reinstatement.
    pub fn unrestricted() -> Self {
        Self {
            can_send_messages: true,
        }
    }
}

/// An inline button attached to a dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}
