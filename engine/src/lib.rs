//! Atrium's core engine.
//!
//! Everything stateful funnels through here: the ticket lifecycle
//! (intake, claim, close), claim-permission arbitration, payment
//! reconciliation against the external gateway, and transcript archiving.
//! The transport layer delivers [`atrium_types::Interaction`]s to the
//! [`Router`] and renders the [`Reply`]s it gets back; the engine itself
//! owns no sockets and no UI.

pub mod chat;
pub mod claims;
pub mod payments;
pub mod permissions;
pub mod router;
pub mod tickets;
pub mod transcript;

#[cfg(test)]
mod tests;

pub use chat::{
    ChannelGrants, ChatGateway, ChatMessage, CreateChannelSpec, HistoryPage, PermissionOverwrite,
};
pub use claims::ClaimArbitrator;
pub use payments::{CreatedRequest, NewRequest, PaymentReconciler};
pub use permissions::PermissionGate;
pub use router::{Reply, Router};
pub use tickets::{
    CloseReport, IntakePrompt, ScheduledDeletion, TicketLifecycleManager, TicketSettings,
};
pub use transcript::{CloseLogEntry, LogSink, Transcript, TranscriptArchiver};
