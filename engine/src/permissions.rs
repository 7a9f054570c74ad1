//! Capability checks against guild-configured role sets.

use std::sync::Arc;

use atrium_store::Store;
use atrium_types::{Actor, Capability, CoreError, GuildId, RoleSet};

/// Role set granting general staff powers.
pub const STAFF_ROLE_KEY: &str = "staff_role";
/// Role set granting the generic claim capability.
pub const CLAIM_ROLE_KEY: &str = "claim_role";

/// Decides whether an actor may exercise a capability in a guild.
///
/// Administrators always pass. Everyone else needs at least one role from
/// the configured set; a missing key or a store failure denies.
pub struct PermissionGate {
    store: Arc<Store>,
}

impl PermissionGate {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn permits(&self, guild_id: &GuildId, actor: &Actor, capability: Capability) -> bool {
        if actor.is_admin {
            return true;
        }
        let keys: &[&str] = match capability {
            Capability::Staff => &[STAFF_ROLE_KEY],
            Capability::Claim => &[CLAIM_ROLE_KEY, STAFF_ROLE_KEY],
        };
        keys.iter()
            .any(|key| actor.has_any_role(&self.configured_roles(guild_id, key)))
    }

    /// [`Self::permits`] as a `Result`, for call sites that bail.
    pub fn require(
        &self,
        guild_id: &GuildId,
        actor: &Actor,
        capability: Capability,
    ) -> Result<(), CoreError> {
        if self.permits(guild_id, actor, capability) {
            Ok(())
        } else {
            tracing::debug!(
                guild = %guild_id,
                user = %actor.user_id,
                capability = %capability,
                "capability denied"
            );
            Err(CoreError::PermissionDenied)
        }
    }

    fn configured_roles(&self, guild_id: &GuildId, key: &str) -> RoleSet {
        match self.store.role_set(guild_id, key) {
            Ok(Some(roles)) => roles,
            Ok(None) => RoleSet::new(),
            Err(err) => {
                tracing::warn!(
                    guild = %guild_id,
                    key,
                    "role configuration read failed, denying: {err:#}"
                );
                RoleSet::new()
            }
        }
    }
}
