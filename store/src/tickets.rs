//! Ticket rows and the conditional-update primitive.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Row, params, params_from_iter};

use atrium_types::{
    ChannelId, FormData, GuildId, Ticket, TicketId, TicketStatus, TicketType, UserId,
};

use crate::Store;

/// Fields for a ticket insert.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub ticket_type: TicketType,
    pub created_at: DateTime<Utc>,
    pub form_data: Option<FormData>,
}

/// Fields applied by a conditional status update.
///
/// Claim and close both go through [`Store::update_ticket_if_status`]; this
/// carries the target status plus whichever actor/timestamp pair the
/// transition sets.
#[derive(Debug, Clone)]
pub struct TicketUpdate {
    status: TicketStatus,
    claimed_by: Option<UserId>,
    claimed_at: Option<DateTime<Utc>>,
    closed_by: Option<UserId>,
    closed_at: Option<DateTime<Utc>>,
}

impl TicketUpdate {
    /// Transition to `claimed` by the given actor.
    #[must_use]
    pub fn claim(by: UserId, at: DateTime<Utc>) -> Self {
        Self {
            status: TicketStatus::Claimed,
            claimed_by: Some(by),
            claimed_at: Some(at),
            closed_by: None,
            closed_at: None,
        }
    }

    /// Transition to `closed` by the given actor.
    #[must_use]
    pub fn close(by: UserId, at: DateTime<Utc>) -> Self {
        Self {
            status: TicketStatus::Closed,
            claimed_by: None,
            claimed_at: None,
            closed_by: Some(by),
            closed_at: Some(at),
        }
    }
}

/// Result of a compare-and-swap update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The row matched one of the expected statuses and was updated.
    Updated,
    /// The row exists but its status changed underneath us; nothing written.
    Conflict,
}

impl Store {
    /// Insert a new `open` ticket and return the stored record.
    pub fn insert_ticket(&self, new: &NewTicket) -> Result<Ticket> {
        let form_json = new
            .form_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode ticket form data")?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tickets
                 (guild_id, channel_id, user_id, ticket_type, status, created_at, form_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.guild_id.as_str(),
                new.channel_id.as_str(),
                new.user_id.as_str(),
                new.ticket_type.as_str(),
                TicketStatus::Open.as_str(),
                new.created_at.to_rfc3339(),
                form_json,
            ],
        )
        .context("Failed to insert ticket")?;

        let id = TicketId::new(conn.last_insert_rowid());
        Ok(Ticket {
            id,
            guild_id: new.guild_id.clone(),
            channel_id: new.channel_id.clone(),
            user_id: new.user_id.clone(),
            ticket_type: new.ticket_type,
            status: TicketStatus::Open,
            claimed_by: None,
            claimed_at: None,
            closed_by: None,
            closed_at: None,
            created_at: new.created_at,
            form_data: new.form_data.clone(),
        })
    }

    /// Fetch a single ticket by id.
    pub fn ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{TICKET_SELECT} WHERE id = ?1"))
            .context("Failed to prepare ticket query")?;
        let mut rows = stmt
            .query_map(params![id.value()], ticket_from_row)
            .context("Failed to query ticket")?;
        rows.next().transpose().context("Failed to read ticket row")
    }

    /// Fetch the ticket living in the given channel, if any.
    ///
    /// Non-closed tickets win over closed ones so that a reused channel id
    /// resolves to the live ticket.
    pub fn ticket_by_channel(&self, channel_id: &ChannelId) -> Result<Option<Ticket>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{TICKET_SELECT} WHERE channel_id = ?1
                 ORDER BY (status = 'closed') ASC, id DESC LIMIT 1"
            ))
            .context("Failed to prepare ticket-by-channel query")?;
        let mut rows = stmt
            .query_map(params![channel_id.as_str()], ticket_from_row)
            .context("Failed to query ticket by channel")?;
        rows.next().transpose().context("Failed to read ticket row")
    }

    /// Conditionally update a ticket's status.
    ///
    /// The update is applied only if the currently persisted status is one
    /// of `expected`; otherwise nothing is written and `Conflict` is
    /// returned. This is the single concurrency primitive used by claim
    /// and close.
    pub fn update_ticket_if_status(
        &self,
        id: TicketId,
        expected: &[TicketStatus],
        update: &TicketUpdate,
    ) -> Result<CasOutcome> {
        if expected.is_empty() {
            return Err(anyhow!("conditional ticket update requires expected statuses"));
        }

        let placeholders = (0..expected.len())
            .map(|i| format!("?{}", i + 7))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE tickets SET
                 status = ?1,
                 claimed_by = COALESCE(?2, claimed_by),
                 claimed_at = COALESCE(?3, claimed_at),
                 closed_by = COALESCE(?4, closed_by),
                 closed_at = COALESCE(?5, closed_at)
             WHERE id = ?6 AND status IN ({placeholders})"
        );

        let mut values: Vec<Value> = vec![
            Value::from(update.status.as_str().to_string()),
            update
                .claimed_by
                .as_ref()
                .map_or(Value::Null, |u| Value::from(u.as_str().to_string())),
            update
                .claimed_at
                .map_or(Value::Null, |t| Value::from(t.to_rfc3339())),
            update
                .closed_by
                .as_ref()
                .map_or(Value::Null, |u| Value::from(u.as_str().to_string())),
            update
                .closed_at
                .map_or(Value::Null, |t| Value::from(t.to_rfc3339())),
            Value::from(id.value()),
        ];
        values.extend(
            expected
                .iter()
                .map(|s| Value::from(s.as_str().to_string())),
        );

        let changed = self
            .conn()?
            .execute(&sql, params_from_iter(values))
            .context("Failed to apply conditional ticket update")?;

        Ok(if changed > 0 {
            CasOutcome::Updated
        } else {
            CasOutcome::Conflict
        })
    }
}

const TICKET_SELECT: &str = "SELECT id, guild_id, channel_id, user_id, ticket_type, status,
            claimed_by, claimed_at, closed_by, closed_at, created_at, form_data
     FROM tickets";

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    let decode = |idx: usize, err: anyhow::Error| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            err.into(),
        )
    };

    let ticket_type_raw: String = row.get(4)?;
    let ticket_type =
        TicketType::parse(&ticket_type_raw).map_err(|e| decode(4, anyhow!(e)))?;

    let status_raw: String = row.get(5)?;
    let status = match status_raw.as_str() {
        "open" => TicketStatus::Open,
        "claimed" => TicketStatus::Claimed,
        "closed" => TicketStatus::Closed,
        other => return Err(decode(5, anyhow!("invalid ticket status '{other}'"))),
    };

    let claimed_at = crate::parse_timestamp_opt(row.get(7)?).map_err(|e| decode(7, e))?;
    let closed_at = crate::parse_timestamp_opt(row.get(9)?).map_err(|e| decode(9, e))?;
    let created_at_raw: String = row.get(10)?;
    let created_at = crate::parse_timestamp(&created_at_raw).map_err(|e| decode(10, e))?;

    let form_data = row
        .get::<_, Option<String>>(11)?
        .as_deref()
        .map(serde_json::from_str::<FormData>)
        .transpose()
        .map_err(|e| decode(11, anyhow!(e)))?;

    Ok(Ticket {
        id: TicketId::new(row.get(0)?),
        guild_id: GuildId::new(row.get::<_, String>(1)?),
        channel_id: ChannelId::new(row.get::<_, String>(2)?),
        user_id: UserId::new(row.get::<_, String>(3)?),
        ticket_type,
        status,
        claimed_by: row.get::<_, Option<String>>(6)?.map(UserId::new),
        claimed_at,
        closed_by: row.get::<_, Option<String>>(8)?.map(UserId::new),
        closed_at,
        created_at,
        form_data,
    })
}
