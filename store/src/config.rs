//! Guild configuration values and application role offers.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use atrium_types::{GuildId, RoleConfigValue, RoleId, RoleSet, UserId};

use crate::Store;

impl Store {
    /// Fetch a raw configuration value for `(guild, key)`.
    pub fn config_value(&self, guild_id: &GuildId, key: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT value FROM config WHERE guild_id = ?1 AND key = ?2",
                params![guild_id.as_str(), key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read config key '{key}'"))
    }

    /// Insert or replace a configuration value.
    pub fn set_config_value(&self, guild_id: &GuildId, key: &str, value: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO config (guild_id, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (guild_id, key) DO UPDATE SET value = excluded.value",
                params![guild_id.as_str(), key, value],
            )
            .with_context(|| format!("Failed to upsert config key '{key}'"))?;
        Ok(())
    }

    /// Fetch a role-set configuration value, normalized at the read boundary.
    ///
    /// Legacy scalar records decode as singleton sets; `None` means the key
    /// is not configured at all.
    pub fn role_set(&self, guild_id: &GuildId, key: &str) -> Result<Option<RoleSet>> {
        Ok(self
            .config_value(guild_id, key)?
            .map(|raw| RoleConfigValue::decode(&raw).into_set()))
    }

    /// Record the role set offered to a user during application intake.
    ///
    /// Overwrites any previous offer for the same `(guild, user)`.
    pub fn put_role_offer(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        roles: &RoleSet,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let encoded = serde_json::to_string(&roles.iter().collect::<Vec<_>>())
            .context("Failed to encode role offer")?;
        self.conn()?
            .execute(
                "INSERT INTO role_offers (guild_id, user_id, role_ids, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (guild_id, user_id) DO UPDATE
                 SET role_ids = excluded.role_ids, expires_at = excluded.expires_at",
                params![
                    guild_id.as_str(),
                    user_id.as_str(),
                    encoded,
                    expires_at.to_rfc3339()
                ],
            )
            .context("Failed to record role offer")?;
        Ok(())
    }

    /// Consume the role offer for `(guild, user)`.
    ///
    /// The row is removed whether or not it is still valid; an expired
    /// offer returns `None` so a stale selection cannot be accepted.
    pub fn take_role_offer(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<RoleSet>> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT role_ids, expires_at FROM role_offers
                 WHERE guild_id = ?1 AND user_id = ?2",
                params![guild_id.as_str(), user_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to read role offer")?;

        let Some((encoded, expires_raw)) = row else {
            return Ok(None);
        };

        conn.execute(
            "DELETE FROM role_offers WHERE guild_id = ?1 AND user_id = ?2",
            params![guild_id.as_str(), user_id.as_str()],
        )
        .context("Failed to consume role offer")?;

        let expires_at = crate::parse_timestamp(&expires_raw)?;
        if expires_at <= now {
            tracing::debug!(
                guild = %guild_id,
                user = %user_id,
                "Discarding expired role offer"
            );
            return Ok(None);
        }

        let ids: Vec<RoleId> =
            serde_json::from_str(&encoded).context("Failed to decode role offer")?;
        Ok(Some(ids.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn config_upsert_replaces_value() {
        let store = Store::open_in_memory().unwrap();
        let guild = GuildId::from("G1");

        assert!(store.config_value(&guild, "ticket_category").unwrap().is_none());

        store.set_config_value(&guild, "ticket_category", "CAT1").unwrap();
        assert_eq!(
            store.config_value(&guild, "ticket_category").unwrap().as_deref(),
            Some("CAT1")
        );

        store.set_config_value(&guild, "ticket_category", "CAT2").unwrap();
        assert_eq!(
            store.config_value(&guild, "ticket_category").unwrap().as_deref(),
            Some("CAT2")
        );
    }

    #[test]
    fn config_is_scoped_per_guild() {
        let store = Store::open_in_memory().unwrap();
        store
            .set_config_value(&GuildId::from("G1"), "staff_role", "111")
            .unwrap();
        assert!(
            store
                .config_value(&GuildId::from("G2"), "staff_role")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn role_set_normalizes_both_encodings() {
        let store = Store::open_in_memory().unwrap();
        let guild = GuildId::from("G1");

        store.set_config_value(&guild, "claim_role", "999").unwrap();
        let legacy = store.role_set(&guild, "claim_role").unwrap().unwrap();

        store
            .set_config_value(&guild, "claim_role", r#"["999"]"#)
            .unwrap();
        let migrated = store.role_set(&guild, "claim_role").unwrap().unwrap();

        assert_eq!(legacy, migrated);
        assert_eq!(legacy, RoleSet::from([RoleId::from("999")]));
    }

    #[test]
    fn role_offer_is_consumed_once() {
        let store = Store::open_in_memory().unwrap();
        let guild = GuildId::from("G1");
        let user = UserId::from("U1");
        let roles = RoleSet::from([RoleId::from("R1"), RoleId::from("R2")]);
        let now = Utc::now();

        store
            .put_role_offer(&guild, &user, &roles, now + Duration::minutes(10))
            .unwrap();

        let taken = store.take_role_offer(&guild, &user, now).unwrap();
        assert_eq!(taken, Some(roles));

        // Second take finds nothing.
        assert!(store.take_role_offer(&guild, &user, now).unwrap().is_none());
    }

    #[test]
    fn expired_role_offer_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let guild = GuildId::from("G1");
        let user = UserId::from("U1");
        let now = Utc::now();

        store
            .put_role_offer(
                &guild,
                &user,
                &RoleSet::from([RoleId::from("R1")]),
                now - Duration::seconds(1),
            )
            .unwrap();

        assert!(store.take_role_offer(&guild, &user, now).unwrap().is_none());
        // The expired row was also cleaned up.
        assert!(store.take_role_offer(&guild, &user, now).unwrap().is_none());
    }
}
