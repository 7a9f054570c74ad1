//! SQLite-backed persistence for Atrium.
//!
//! The store owns tickets, payment requests, guild configuration, and the
//! short-lived application role offers. It is the sole serialization point
//! of the system: every interaction task funnels its reads and writes
//! through one connection behind a mutex, and the conditional-update
//! primitive ([`Store::update_ticket_if_status`]) is what makes claim and
//! close races safe.
//!
//! Timestamps are stored as RFC 3339 text in UTC; amounts as exact cents.

mod config;
mod payments;
mod tickets;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub use tickets::{CasOutcome, NewTicket, TicketUpdate};
pub use payments::NewPayment;

/// Persistent store for tickets, payments, and guild configuration.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS tickets (
            id INTEGER PRIMARY KEY,
            guild_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            ticket_type TEXT NOT NULL,
            status TEXT NOT NULL,
            claimed_by TEXT,
            claimed_at TEXT,
            closed_by TEXT,
            closed_at TEXT,
            created_at TEXT NOT NULL,
            form_data TEXT
        );

        -- A channel hosts at most one live ticket; closed tickets keep
        -- their channel id for the record but drop out of the constraint.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tickets_live_channel
        ON tickets(channel_id) WHERE status != 'closed';

        CREATE INDEX IF NOT EXISTS idx_tickets_guild_status
        ON tickets(guild_id, status);

        CREATE TABLE IF NOT EXISTS payments (
            id INTEGER PRIMARY KEY,
            ticket_id INTEGER,
            user_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL,
            gateway_order_id TEXT NOT NULL,
            requested_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            paid_at TEXT,
            refund_reason TEXT,
            refunded_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_payments_status
        ON payments(status);

        CREATE TABLE IF NOT EXISTS config (
            guild_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (guild_id, key)
        );

        CREATE TABLE IF NOT EXISTS role_offers (
            guild_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role_ids TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            PRIMARY KEY (guild_id, user_id)
        );
    ";

    /// Open or create the store database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        Self::initialize(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory store")?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )
        .context("Failed to set store pragmas")?;
        conn.execute_batch(Self::SCHEMA)
            .context("Failed to create store schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("store connection mutex poisoned"))
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp '{raw}'"))
}

pub(crate) fn parse_timestamp_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}
