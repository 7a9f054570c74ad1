//! Transcript assembly and delivery to the guild's log channel.

use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use atrium_types::{ChannelId, CoreError, Ticket};

use crate::chat::{ChatGateway, ChatMessage};

/// A rendered channel transcript, ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub file_name: String,
    pub content: String,
}

/// Closure metadata that accompanies an archived transcript.
#[derive(Debug, Clone)]
pub struct CloseLogEntry {
    pub ticket: Ticket,
    pub closed_by_name: String,
}

/// Receives closed-ticket transcripts, typically by posting them to a
/// configured log channel.
pub trait LogSink: Send + Sync {
    fn archive(
        &self,
        log_channel: &ChannelId,
        transcript: &Transcript,
        entry: &CloseLogEntry,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Walks a channel's full history and renders it as a plain-text log.
pub struct TranscriptArchiver<C> {
    chat: Arc<C>,
}

impl<C: ChatGateway> TranscriptArchiver<C> {
    pub fn new(chat: Arc<C>) -> Self {
        Self { chat }
    }

    /// Collect every message in the ticket's channel, oldest first, and
    /// render the transcript.
    ///
    /// Pagination runs to exhaustion; messages are sorted by send time
    /// afterwards because pages arrive newest-first.
    pub async fn archive(
        &self,
        ticket: &Ticket,
        closed_at: DateTime<Utc>,
    ) -> Result<Transcript, CoreError> {
        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut before = None;
        loop {
            let page = self
                .chat
                .fetch_history(&ticket.channel_id, before.as_ref())
                .await
                .map_err(CoreError::chat)?;
            messages.extend(page.messages);
            match page.next_before {
                Some(cursor) => before = Some(cursor),
                None => break,
            }
        }
        messages.sort_by_key(|m| m.sent_at);

        Ok(Transcript {
            file_name: format!("ticket-{}-transcript.txt", ticket.id),
            content: render(ticket, closed_at, &messages),
        })
    }
}

fn render(ticket: &Ticket, closed_at: DateTime<Utc>, messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Transcript for ticket #{} ({})",
        ticket.id, ticket.ticket_type
    );
    let _ = writeln!(out, "Opened by {} at {}", ticket.user_id, ticket.created_at.to_rfc3339());
    let _ = writeln!(out, "Closed at {}", closed_at.to_rfc3339());
    out.push_str("----------------------------------------\n");

    for message in messages {
        let _ = writeln!(out, "[{}] {}:", message.sent_at.to_rfc3339(), message.author);
        out.push_str(&message.content);
        out.push('\n');
        if !message.attachments.is_empty() {
            let _ = writeln!(out, "Attachments: {}", message.attachments.join(", "));
        }
        out.push('\n');
    }
    out
}
