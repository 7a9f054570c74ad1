//! Who may claim which kind of ticket.

use std::sync::Arc;

use atrium_store::Store;
use atrium_types::{Actor, CoreError, GuildId, RoleSet, TicketType};

use crate::permissions::CLAIM_ROLE_KEY;

/// Role set allowed to claim application tickets.
pub const APPLICATION_CLAIM_ROLES_KEY: &str = "application_claim_roles";
/// Role set allowed to claim support tickets.
pub const SUPPORT_CLAIM_ROLES_KEY: &str = "support_claim_roles";

/// Resolves the claim-role set for a ticket type and arbitrates claims.
///
/// Application and support tickets each read their dedicated configuration
/// key and nothing else; an unset key means nobody but an administrator
/// may claim. Only quote tickets use the generic claim-role set.
pub struct ClaimArbitrator {
    store: Arc<Store>,
}

impl ClaimArbitrator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// The role set whose members may claim tickets of `ticket_type`.
    pub fn allowed_roles(
        &self,
        guild_id: &GuildId,
        ticket_type: TicketType,
    ) -> Result<RoleSet, CoreError> {
        let key = Self::dedicated_key(ticket_type).unwrap_or(CLAIM_ROLE_KEY);
        Ok(self
            .store
            .role_set(guild_id, key)
            .map_err(CoreError::store)?
            .unwrap_or_default())
    }

    /// Whether `actor` may claim a ticket of `ticket_type`.
    ///
    /// Administrators always may; everyone else needs a role from the
    /// resolved set. Store failures deny.
    #[must_use]
    pub fn permits(&self, guild_id: &GuildId, actor: &Actor, ticket_type: TicketType) -> bool {
        if actor.is_admin {
            return true;
        }
        match self.allowed_roles(guild_id, ticket_type) {
            Ok(roles) => actor.has_any_role(&roles),
            Err(err) => {
                tracing::warn!(
                    guild = %guild_id,
                    ticket_type = %ticket_type,
                    "claim-role resolution failed, denying: {err:#}"
                );
                false
            }
        }
    }

    const fn dedicated_key(ticket_type: TicketType) -> Option<&'static str> {
        match ticket_type {
            TicketType::Application => Some(APPLICATION_CLAIM_ROLES_KEY),
            TicketType::Support => Some(SUPPORT_CLAIM_ROLES_KEY),
            TicketType::Quote => None,
        }
    }
}
