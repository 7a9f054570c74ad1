//! Ticket records and the ticket state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ChannelId, GuildId, RoleId, TicketId, UserId};

/// Kind of work a ticket tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    Support,
    Application,
    Quote,
}

const TICKET_TYPE_VALUES: &[&str] = &["support", "application", "quote"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ticket type '{raw}'; expected one of: {TICKET_TYPE_VALUES:?}")]
pub struct TicketTypeParseError {
    raw: String,
}

impl TicketType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TicketType::Support => "support",
            TicketType::Application => "application",
            TicketType::Quote => "quote",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, TicketTypeParseError> {
        match raw {
            "support" => Ok(TicketType::Support),
            "application" => Ok(TicketType::Application),
            "quote" => Ok(TicketType::Quote),
            _ => Err(TicketTypeParseError {
                raw: raw.to_string(),
            }),
        }
    }

    #[must_use]
    pub const fn all() -> &'static [TicketType] {
        &[TicketType::Support, TicketType::Application, TicketType::Quote]
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a ticket.
///
/// Transitions only move forward: `open -> claimed -> closed` or directly
/// `open -> closed`. `closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Claimed,
    Closed,
}

impl TicketStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Claimed => "claimed",
            TicketStatus::Closed => "closed",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (TicketStatus::Open, TicketStatus::Claimed)
                | (TicketStatus::Open | TicketStatus::Claimed, TicketStatus::Closed)
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, TicketStatus::Closed)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured intake form, shaped by ticket type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormData {
    Support {
        issue: String,
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tried: Option<String>,
    },
    Quote {
        project_description: String,
        budget: String,
        timeline: String,
    },
    Application {
        position: String,
        role_id: RoleId,
        experience: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        portfolio: Option<String>,
    },
}

impl FormData {
    /// The ticket type this form belongs to.
    #[must_use]
    pub const fn ticket_type(&self) -> TicketType {
        match self {
            FormData::Support { .. } => TicketType::Support,
            FormData::Quote { .. } => TicketType::Quote,
            FormData::Application { .. } => TicketType::Application,
        }
    }
}

/// A tracked unit of work and its dedicated channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub ticket_type: TicketType,
    pub status: TicketStatus,
    pub claimed_by: Option<UserId>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<UserId>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub form_data: Option<FormData>,
}
