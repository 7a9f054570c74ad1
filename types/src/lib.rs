//! Core domain types for Atrium.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the
//! application: ticket and payment records, role configuration, the
//! interaction envelope delivered by the chat gateway, and the error
//! taxonomy every operation reports through.

mod error;
mod ids;
mod interaction;
mod payment;
mod roles;
mod ticket;

pub use error::CoreError;
pub use ids::{ChannelId, GuildId, MessageId, PaymentId, RoleId, TicketId, UserId};
pub use interaction::{Actor, Capability, Interaction, InteractionKind};
pub use payment::{Amount, AmountParseError, PaymentRequest, PaymentStatus};
pub use roles::{RoleConfigValue, RoleSet};
pub use ticket::{FormData, Ticket, TicketStatus, TicketType, TicketTypeParseError};
