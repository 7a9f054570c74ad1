//! The interaction envelope delivered by the chat gateway.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, GuildId, UserId};
use crate::roles::RoleSet;

/// How the interaction reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Command,
    Button,
    Modal,
    Menu,
}

impl InteractionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            InteractionKind::Command => "command",
            InteractionKind::Button => "button",
            InteractionKind::Modal => "modal",
            InteractionKind::Menu => "menu",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user behind an interaction, with everything permission checks need.
///
/// Role membership and the administrator bit are resolved by the transport
/// layer before the interaction reaches the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub username: String,
    pub roles: RoleSet,
    pub is_admin: bool,
}

impl Actor {
    /// Whether the actor holds at least one role from `allowed`.
    #[must_use]
    pub fn has_any_role(&self, allowed: &RoleSet) -> bool {
        !self.roles.is_disjoint(allowed)
    }
}

/// One inbound interaction from the chat gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub kind: InteractionKind,
    pub actor: Actor,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    /// Component custom id for buttons/modals/menus, command name for commands.
    pub custom_id: String,
    /// Form fields, command options, or menu selections keyed by name.
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
}

impl Interaction {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).map(String::as_str)
    }
}

/// Capabilities the permission gate arbitrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Staff,
    Claim,
}

impl Capability {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Capability::Staff => "staff",
            Capability::Claim => "claim",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
