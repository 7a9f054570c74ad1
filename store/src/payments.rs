//! Payment request rows.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Row, params};

use atrium_types::{Amount, PaymentId, PaymentRequest, PaymentStatus, TicketId, UserId};

use crate::Store;

/// Fields for a payment-request insert.
///
/// A row is only ever created after the gateway accepted the order, so the
/// order id is mandatory here.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub ticket_id: Option<TicketId>,
    pub user_id: UserId,
    pub amount: Amount,
    pub description: String,
    pub gateway_order_id: String,
    pub requested_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Insert a new `pending` payment request and return the stored record.
    pub fn insert_payment(&self, new: &NewPayment) -> Result<PaymentRequest> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO payments
                 (ticket_id, user_id, amount_cents, description, status,
                  gateway_order_id, requested_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.ticket_id.map(TicketId::value),
                new.user_id.as_str(),
                new.amount.cents(),
                new.description,
                PaymentStatus::Pending.as_str(),
                new.gateway_order_id,
                new.requested_by.as_str(),
                new.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert payment request")?;

        let id = PaymentId::new(conn.last_insert_rowid());
        Ok(PaymentRequest {
            id,
            ticket_id: new.ticket_id,
            user_id: new.user_id.clone(),
            amount: new.amount,
            description: new.description.clone(),
            status: PaymentStatus::Pending,
            gateway_order_id: new.gateway_order_id.clone(),
            requested_by: new.requested_by.clone(),
            created_at: new.created_at,
            paid_at: None,
            refund_reason: None,
            refunded_at: None,
        })
    }

    /// Fetch a single payment request by id.
    pub fn payment(&self, id: PaymentId) -> Result<Option<PaymentRequest>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{PAYMENT_SELECT} WHERE id = ?1"))
            .context("Failed to prepare payment query")?;
        let mut rows = stmt
            .query_map(params![id.value()], payment_from_row)
            .context("Failed to query payment")?;
        rows.next()
            .transpose()
            .context("Failed to read payment row")
    }

    /// All payment requests currently in the given status, oldest first.
    pub fn payments_with_status(&self, status: PaymentStatus) -> Result<Vec<PaymentRequest>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{PAYMENT_SELECT} WHERE status = ?1 ORDER BY id ASC"
            ))
            .context("Failed to prepare payments-by-status query")?;
        let rows = stmt
            .query_map(params![status.as_str()], payment_from_row)
            .context("Failed to query payments by status")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read payment rows")
    }

    /// Set a payment's status, recording `paid_at` when it completes.
    ///
    /// Returns false if no such row exists.
    pub fn set_payment_status(
        &self,
        id: PaymentId,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE payments SET status = ?1, paid_at = COALESCE(?2, paid_at)
                 WHERE id = ?3",
                params![
                    status.as_str(),
                    paid_at.map(|t| t.to_rfc3339()),
                    id.value()
                ],
            )
            .context("Failed to update payment status")?;
        Ok(changed > 0)
    }

    /// Mark a payment refunded with its reason and timestamp.
    pub fn set_payment_refunded(
        &self,
        id: PaymentId,
        reason: &str,
        refunded_at: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE payments
                 SET status = ?1, refund_reason = ?2, refunded_at = ?3
                 WHERE id = ?4",
                params![
                    PaymentStatus::Refunded.as_str(),
                    reason,
                    refunded_at.to_rfc3339(),
                    id.value()
                ],
            )
            .context("Failed to mark payment refunded")?;
        Ok(changed > 0)
    }

    /// Hard-delete a payment request row.
    pub fn delete_payment(&self, id: PaymentId) -> Result<bool> {
        let changed = self
            .conn()?
            .execute("DELETE FROM payments WHERE id = ?1", params![id.value()])
            .context("Failed to delete payment request")?;
        Ok(changed > 0)
    }
}

const PAYMENT_SELECT: &str = "SELECT id, ticket_id, user_id, amount_cents, description, status,
            gateway_order_id, requested_by, created_at, paid_at, refund_reason, refunded_at
     FROM payments";

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<PaymentRequest> {
    let decode = |idx: usize, err: anyhow::Error| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            err.into(),
        )
    };

    let status_raw: String = row.get(5)?;
    let status = match status_raw.as_str() {
        "pending" => PaymentStatus::Pending,
        "completed" => PaymentStatus::Completed,
        "refunded" => PaymentStatus::Refunded,
        "cancelled" => PaymentStatus::Cancelled,
        other => return Err(decode(5, anyhow!("invalid payment status '{other}'"))),
    };

    let created_at_raw: String = row.get(8)?;
    let created_at = crate::parse_timestamp(&created_at_raw).map_err(|e| decode(8, e))?;
    let paid_at = crate::parse_timestamp_opt(row.get(9)?).map_err(|e| decode(9, e))?;
    let refunded_at = crate::parse_timestamp_opt(row.get(11)?).map_err(|e| decode(11, e))?;

    Ok(PaymentRequest {
        id: PaymentId::new(row.get(0)?),
        ticket_id: row.get::<_, Option<i64>>(1)?.map(TicketId::new),
        user_id: UserId::new(row.get::<_, String>(2)?),
        amount: Amount::from_cents(row.get(3)?),
        description: row.get(4)?,
        status,
        gateway_order_id: row.get(6)?,
        requested_by: UserId::new(row.get::<_, String>(7)?),
        created_at,
        paid_at,
        refund_reason: row.get(10)?,
        refunded_at,
    })
}
