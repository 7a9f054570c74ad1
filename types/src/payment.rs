//! Payment requests and the exact-cents amount type.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{PaymentId, TicketId, UserId};

/// A currency amount held as exact cents.
///
/// Amounts enter the system as decimal strings and are normalized to two
/// decimal places with half-up rounding (`"49.995"` becomes `50.00`).
/// Binary floats are never used for arithmetic, only as a convenience entry
/// point that goes through the same decimal rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(i64);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid amount '{raw}': {reason}")]
pub struct AmountParseError {
    raw: String,
    reason: &'static str,
}

impl AmountParseError {
    fn new(raw: &str, reason: &'static str) -> Self {
        Self {
            raw: raw.to_string(),
            reason,
        }
    }
}

impl Amount {
    /// Parse a decimal string, rounding half-up to cents.
    pub fn parse(raw: &str) -> Result<Self, AmountParseError> {
        let trimmed = raw.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(AmountParseError::new(raw, "empty value"));
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(AmountParseError::new(raw, "expected a decimal number"));
        }

        let whole: i64 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| AmountParseError::new(raw, "integer part out of range"))?
        };

        let mut frac = frac_part.bytes();
        let tens = i64::from(frac.next().map_or(0, |b| b - b'0'));
        let units = i64::from(frac.next().map_or(0, |b| b - b'0'));
        // Half-up on the first dropped digit.
        let round_up = i64::from(frac.next().is_some_and(|b| b >= b'5'));

        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(tens * 10 + units + round_up))
            .ok_or_else(|| AmountParseError::new(raw, "value out of range"))?;

        Ok(Self(if negative { -cents } else { cents }))
    }

    /// Convert a float by rendering it at millicent precision and applying
    /// the same decimal rounding as [`Amount::parse`].
    pub fn from_f64(value: f64) -> Result<Self, AmountParseError> {
        if !value.is_finite() {
            return Err(AmountParseError::new("non-finite", "expected a decimal number"));
        }
        Self::parse(&format!("{value:.3}"))
    }

    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Amount> for String {
    fn from(value: Amount) -> Self {
        value.to_string()
    }
}

/// Lifecycle state of a payment request.
///
/// Monotonic: `pending -> completed | cancelled`, `completed -> refunded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the status machine permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Completed | PaymentStatus::Cancelled)
                | (PaymentStatus::Completed, PaymentStatus::Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment request reconciled against an external gateway order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: PaymentId,
    pub ticket_id: Option<TicketId>,
    pub user_id: UserId,
    pub amount: Amount,
    pub description: String,
    pub status: PaymentStatus,
    pub gateway_order_id: String,
    pub requested_by: UserId,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
}
