//! The chat transport, as the engine sees it.
//!
//! The concrete transport (a Discord client, a test double) implements
//! [`ChatGateway`]; the engine never touches a socket itself. All methods
//! return `anyhow` errors because the engine only needs to know that the
//! call failed, not how.

use std::future::Future;

use anyhow::Result;
use chrono::{DateTime, Utc};

use atrium_types::{ChannelId, GuildId, MessageId};

/// Permission bits a channel overwrite can set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelGrants {
    pub view: bool,
    pub send: bool,
    pub read_history: bool,
    pub manage: bool,
}

impl ChannelGrants {
    /// See the channel, talk in it, read its history.
    #[must_use]
    pub const fn participant() -> Self {
        Self {
            view: true,
            send: true,
            read_history: true,
            manage: false,
        }
    }

    /// Participant plus message management.
    #[must_use]
    pub const fn moderator() -> Self {
        Self {
            view: true,
            send: true,
            read_history: true,
            manage: true,
        }
    }
}

/// One subject's overwrite on a channel.
///
/// The subject is a user or role snowflake; the guild id stands in for the
/// everyone role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionOverwrite {
    pub subject: String,
    pub allow: ChannelGrants,
    pub deny: ChannelGrants,
}

/// Everything needed to create a ticket channel in one call.
#[derive(Debug, Clone)]
pub struct CreateChannelSpec {
    pub guild_id: GuildId,
    pub name: String,
    pub category: Option<ChannelId>,
    pub topic: Option<String>,
    pub overwrites: Vec<PermissionOverwrite>,
}

/// A message as the transcript archiver consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub author: String,
    pub sent_at: DateTime<Utc>,
    pub content: String,
    pub attachments: Vec<String>,
}

/// One page of channel history.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub messages: Vec<ChatMessage>,
    /// Cursor for the page before this message; `None` once exhausted.
    pub next_before: Option<MessageId>,
}

/// Channel and message operations the engine performs.
pub trait ChatGateway: Send + Sync {
    /// Create a channel and return its id.
    fn create_channel(
        &self,
        spec: &CreateChannelSpec,
    ) -> impl Future<Output = Result<ChannelId>> + Send;

    /// Delete a channel outright.
    fn delete_channel(&self, channel: &ChannelId) -> impl Future<Output = Result<()>> + Send;

    /// Apply a permission overwrite to an existing channel.
    fn set_channel_permission(
        &self,
        channel: &ChannelId,
        overwrite: &PermissionOverwrite,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Post a message to a channel.
    fn send_message(
        &self,
        channel: &ChannelId,
        content: &str,
    ) -> impl Future<Output = Result<MessageId>> + Send;

    /// Fetch one page of history, walking backwards from `before`.
    fn fetch_history(
        &self,
        channel: &ChannelId,
        before: Option<&MessageId>,
    ) -> impl Future<Output = Result<HistoryPage>> + Send;
}
