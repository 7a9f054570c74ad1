//! Ticket lifecycle: intake, claim, close.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use atrium_store::{CasOutcome, NewTicket, Store, TicketUpdate};
use atrium_types::{
    Actor, ChannelId, CoreError, FormData, GuildId, RoleSet, Ticket, TicketId, TicketStatus,
    TicketType, UserId,
};

use crate::chat::{ChannelGrants, ChatGateway, CreateChannelSpec, PermissionOverwrite};
use crate::claims::ClaimArbitrator;
use crate::permissions::STAFF_ROLE_KEY;
use crate::transcript::{CloseLogEntry, LogSink, Transcript, TranscriptArchiver};

/// Category fallback used when a type has no dedicated category key.
pub const TICKET_CATEGORY_KEY: &str = "ticket_category";
/// Role set offered to applicants during intake.
pub const APPLICATION_ROLES_KEY: &str = "application_roles";
/// Channel that receives closed-ticket transcripts.
pub const LOG_CHANNEL_KEY: &str = "log_channel";

/// Tunables for the lifecycle manager.
#[derive(Debug, Clone, Copy)]
pub struct TicketSettings {
    /// Delay between closing a ticket and deleting its channel.
    pub close_grace: Duration,
    /// How long an application role offer stays redeemable.
    pub offer_ttl: Duration,
}

impl Default for TicketSettings {
    fn default() -> Self {
        Self {
            close_grace: Duration::from_secs(5),
            offer_ttl: Duration::from_secs(900),
        }
    }
}

/// What the transport should show next after an intake button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakePrompt {
    /// Open the intake form for this ticket type.
    Form(TicketType),
    /// Offer these roles for the applicant to pick from first.
    RoleChoice(RoleSet),
}

/// A channel deletion scheduled after the close grace period.
///
/// Dropping this does not cancel the deletion; call [`Self::cancel`] to
/// keep the channel.
#[derive(Debug)]
pub struct ScheduledDeletion {
    channel_id: ChannelId,
    delay: Duration,
    handle: JoinHandle<()>,
}

impl ScheduledDeletion {
    #[must_use]
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Abort the pending deletion, leaving the channel in place.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Wait for the deletion task to settle. Cancelled tasks settle too.
    pub async fn finished(self) {
        let _ = self.handle.await;
    }
}

/// Outcome of a successful close.
#[derive(Debug)]
pub struct CloseReport {
    pub ticket: Ticket,
    pub transcript: Transcript,
    pub deletion: ScheduledDeletion,
    /// Post-closure side effects that failed without reverting the close.
    pub warnings: Vec<String>,
}

/// Drives tickets through `open -> claimed -> closed`.
pub struct TicketLifecycleManager<C, L> {
    store: Arc<Store>,
    chat: Arc<C>,
    log_sink: Arc<L>,
    claims: ClaimArbitrator,
    archiver: TranscriptArchiver<C>,
    settings: TicketSettings,
}

impl<C, L> TicketLifecycleManager<C, L>
where
    C: ChatGateway + 'static,
    L: LogSink,
{
    pub fn new(store: Arc<Store>, chat: Arc<C>, log_sink: Arc<L>, settings: TicketSettings) -> Self {
        Self {
            claims: ClaimArbitrator::new(Arc::clone(&store)),
            archiver: TranscriptArchiver::new(Arc::clone(&chat)),
            store,
            chat,
            log_sink,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &TicketSettings {
        &self.settings
    }

    /// Validate configuration for a create-ticket press and tell the
    /// transport what to show next.
    ///
    /// Fails before any side effect: a missing category or an empty
    /// application role set surfaces as a configuration error.
    pub fn intake(
        &self,
        guild_id: &GuildId,
        ticket_type: TicketType,
    ) -> Result<IntakePrompt, CoreError> {
        self.resolve_category(guild_id, ticket_type)?;
        if ticket_type == TicketType::Application {
            let offered = self
                .store
                .role_set(guild_id, APPLICATION_ROLES_KEY)
                .map_err(CoreError::store)?
                .unwrap_or_default();
            if offered.is_empty() {
                return Err(CoreError::ConfigMissing(APPLICATION_ROLES_KEY));
            }
            return Ok(IntakePrompt::RoleChoice(offered));
        }
        Ok(IntakePrompt::Form(ticket_type))
    }

    /// Record the role set offered to an applicant so the later form
    /// submission can be validated against it.
    pub fn begin_application_selection(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        offered: &RoleSet,
    ) -> Result<(), CoreError> {
        let expires_at =
            Utc::now() + chrono::Duration::seconds(self.settings.offer_ttl.as_secs() as i64);
        self.store
            .put_role_offer(guild_id, user_id, offered, expires_at)
            .map_err(CoreError::store)
    }

    /// Create the ticket: channel first, then the row, then the welcome
    /// message.
    ///
    /// An application submission consumes the stored role offer; a missing,
    /// expired, or mismatched offer rejects the form. If the row insert
    /// fails after the channel exists, the channel stays and the failure is
    /// surfaced.
    pub async fn submit_intake(
        &self,
        guild_id: &GuildId,
        actor: &Actor,
        form: FormData,
    ) -> Result<Ticket, CoreError> {
        let ticket_type = form.ticket_type();
        let category = self.resolve_category(guild_id, ticket_type)?;
        let now = Utc::now();

        if let FormData::Application { role_id, .. } = &form {
            let offered = self
                .store
                .take_role_offer(guild_id, &actor.user_id, now)
                .map_err(CoreError::store)?
                .ok_or_else(|| CoreError::not_found("application offer", &actor.user_id))?;
            if !offered.contains(role_id) {
                return Err(CoreError::not_found("application offer", role_id));
            }
        }

        let staff_roles = self
            .store
            .role_set(guild_id, STAFF_ROLE_KEY)
            .map_err(CoreError::store)?
            .unwrap_or_default();
        let spec = CreateChannelSpec {
            guild_id: guild_id.clone(),
            name: channel_name(ticket_type, &actor.username),
            category: Some(category),
            topic: Some(format!("{ticket_type} ticket for {}", actor.username)),
            overwrites: ticket_overwrites(guild_id, &actor.user_id, &staff_roles),
        };
        let channel_id = self
            .chat
            .create_channel(&spec)
            .await
            .map_err(CoreError::chat)?;

        let ticket = self
            .store
            .insert_ticket(&NewTicket {
                guild_id: guild_id.clone(),
                channel_id: channel_id.clone(),
                user_id: actor.user_id.clone(),
                ticket_type,
                created_at: now,
                form_data: Some(form),
            })
            .map_err(|err| {
                tracing::error!(
                    channel = %channel_id,
                    "ticket insert failed after channel creation, channel left in place: {err:#}"
                );
                CoreError::store(err)
            })?;

        if let Err(err) = self
            .chat
            .send_message(&channel_id, &welcome_message(&ticket, actor))
            .await
        {
            tracing::warn!(ticket = %ticket.id, "welcome message failed: {err:#}");
        }

        tracing::info!(
            ticket = %ticket.id,
            guild = %guild_id,
            user = %actor.user_id,
            ticket_type = %ticket_type,
            channel = %channel_id,
            "ticket created"
        );
        Ok(ticket)
    }

    /// Claim an open ticket for `actor`.
    ///
    /// The store's conditional update decides the winner of a race; every
    /// loser gets [`CoreError::AlreadyClaimed`].
    pub async fn claim(
        &self,
        guild_id: &GuildId,
        actor: &Actor,
        id: TicketId,
    ) -> Result<Ticket, CoreError> {
        let ticket = self.fetch(id)?;
        if ticket.status == TicketStatus::Closed {
            return Err(invalid_state(&ticket, "claim"));
        }
        if !self.claims.permits(guild_id, actor, ticket.ticket_type) {
            return Err(CoreError::PermissionDenied);
        }

        let outcome = self
            .store
            .update_ticket_if_status(
                id,
                &[TicketStatus::Open],
                &TicketUpdate::claim(actor.user_id.clone(), Utc::now()),
            )
            .map_err(CoreError::store)?;
        if outcome == CasOutcome::Conflict {
            // Lost the race; the current status tells us to whom.
            let current = self.fetch(id)?;
            return Err(if current.status == TicketStatus::Closed {
                invalid_state(&current, "claim")
            } else {
                CoreError::AlreadyClaimed
            });
        }

        let overwrite = PermissionOverwrite {
            subject: actor.user_id.as_str().to_string(),
            allow: ChannelGrants::moderator(),
            deny: ChannelGrants::default(),
        };
        if let Err(err) = self
            .chat
            .set_channel_permission(&ticket.channel_id, &overwrite)
            .await
        {
            tracing::warn!(ticket = %id, "claimer channel grant failed: {err:#}");
        }
        if let Err(err) = self
            .chat
            .send_message(
                &ticket.channel_id,
                &format!("Ticket claimed by {}.", actor.username),
            )
            .await
        {
            tracing::warn!(ticket = %id, "claim announcement failed: {err:#}");
        }

        tracing::info!(ticket = %id, claimed_by = %actor.user_id, "ticket claimed");
        self.fetch(id)
    }

    /// Close a ticket: archive the transcript, persist the closure, deliver
    /// the transcript to the log channel, schedule channel deletion.
    ///
    /// The transcript is captured before the status flips so archiving can
    /// never race the channel deletion. Failures after the status flip are
    /// reported in [`CloseReport::warnings`] and never revert the close.
    pub async fn close(&self, actor: &Actor, id: TicketId) -> Result<CloseReport, CoreError> {
        let ticket = self.fetch(id)?;
        if ticket.status == TicketStatus::Closed {
            return Err(invalid_state(&ticket, "close"));
        }

        let closed_at = Utc::now();
        let transcript = self.archiver.archive(&ticket, closed_at).await?;

        let outcome = self
            .store
            .update_ticket_if_status(
                id,
                &[TicketStatus::Open, TicketStatus::Claimed],
                &TicketUpdate::close(actor.user_id.clone(), closed_at),
            )
            .map_err(CoreError::store)?;
        if outcome == CasOutcome::Conflict {
            let current = self.fetch(id)?;
            return Err(invalid_state(&current, "close"));
        }

        let closed = self.fetch(id)?;
        let mut warnings = Vec::new();

        match self
            .store
            .config_value(&ticket.guild_id, LOG_CHANNEL_KEY)
            .map_err(CoreError::store)
        {
            Ok(Some(log_channel)) => {
                let entry = CloseLogEntry {
                    ticket: closed.clone(),
                    closed_by_name: actor.username.clone(),
                };
                if let Err(err) = self
                    .log_sink
                    .archive(
                        &ChannelId::new(log_channel),
                        &transcript,
                        &entry,
                    )
                    .await
                {
                    tracing::warn!(ticket = %id, "transcript delivery failed: {err:#}");
                    warnings.push("transcript could not be delivered to the log channel".to_string());
                }
            }
            Ok(None) => {
                tracing::debug!(guild = %ticket.guild_id, "no log channel configured, transcript not archived");
            }
            Err(err) => {
                tracing::warn!(ticket = %id, "log channel lookup failed: {err:#}");
                warnings.push("transcript could not be delivered to the log channel".to_string());
            }
        }

        let grace = self.settings.close_grace;
        if let Err(err) = self
            .chat
            .send_message(
                &ticket.channel_id,
                &format!("This channel will be deleted in {} seconds.", grace.as_secs()),
            )
            .await
        {
            tracing::warn!(ticket = %id, "close notice failed: {err:#}");
        }

        let deletion = self.schedule_deletion(ticket.channel_id.clone());
        tracing::info!(
            ticket = %id,
            closed_by = %actor.user_id,
            grace_secs = grace.as_secs(),
            "ticket closed"
        );
        Ok(CloseReport {
            ticket: closed,
            transcript,
            deletion,
            warnings,
        })
    }

    fn schedule_deletion(&self, channel_id: ChannelId) -> ScheduledDeletion {
        let chat = Arc::clone(&self.chat);
        let delay = self.settings.close_grace;
        let channel = channel_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = chat.delete_channel(&channel).await {
                tracing::warn!(channel = %channel, "scheduled channel deletion failed: {err:#}");
            }
        });
        ScheduledDeletion {
            channel_id,
            delay,
            handle,
        }
    }

    fn fetch(&self, id: TicketId) -> Result<Ticket, CoreError> {
        self.store
            .ticket(id)
            .map_err(CoreError::store)?
            .ok_or_else(|| CoreError::not_found("ticket", id))
    }

    fn resolve_category(
        &self,
        guild_id: &GuildId,
        ticket_type: TicketType,
    ) -> Result<ChannelId, CoreError> {
        let dedicated = match ticket_type {
            TicketType::Support => "support_category",
            TicketType::Application => "application_category",
            TicketType::Quote => "quote_category",
        };
        for key in [dedicated, TICKET_CATEGORY_KEY] {
            if let Some(value) = self
                .store
                .config_value(guild_id, key)
                .map_err(CoreError::store)?
            {
                return Ok(ChannelId::new(value));
            }
        }
        Err(CoreError::ConfigMissing(TICKET_CATEGORY_KEY))
    }
}

fn invalid_state(ticket: &Ticket, operation: &'static str) -> CoreError {
    CoreError::InvalidState {
        entity: "ticket",
        current: ticket.status.to_string(),
        operation,
    }
}

fn channel_name(ticket_type: TicketType, username: &str) -> String {
    let sanitized: String = username
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    // Short random suffix so concurrent tickets from one user never collide.
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "ticket-{ticket_type}-{}-{}",
        sanitized.trim_matches('-'),
        &suffix[..6]
    )
}

fn ticket_overwrites(
    guild_id: &GuildId,
    user_id: &UserId,
    staff_roles: &RoleSet,
) -> Vec<PermissionOverwrite> {
    // The guild id doubles as the everyone role.
    let mut overwrites = vec![
        PermissionOverwrite {
            subject: guild_id.as_str().to_string(),
            allow: ChannelGrants::default(),
            deny: ChannelGrants::participant(),
        },
        PermissionOverwrite {
            subject: user_id.as_str().to_string(),
            allow: ChannelGrants::participant(),
            deny: ChannelGrants::default(),
        },
    ];
    overwrites.extend(staff_roles.iter().map(|role| PermissionOverwrite {
        subject: role.as_str().to_string(),
        allow: ChannelGrants::moderator(),
        deny: ChannelGrants::default(),
    }));
    overwrites
}

fn welcome_message(ticket: &Ticket, actor: &Actor) -> String {
    let mut out = format!(
        "Welcome {}! A staff member will be with you shortly.\n",
        actor.username
    );
    if let Some(form) = &ticket.form_data {
        out.push('\n');
        out.push_str(&form_summary(form));
    }
    out
}

fn form_summary(form: &FormData) -> String {
    match form {
        FormData::Support {
            issue,
            description,
            tried,
        } => {
            let mut out = format!("Issue: {issue}\nDescription: {description}\n");
            if let Some(tried) = tried {
                out.push_str(&format!("Already tried: {tried}\n"));
            }
            out
        }
        FormData::Quote {
            project_description,
            budget,
            timeline,
        } => format!(
            "Project: {project_description}\nBudget: {budget}\nTimeline: {timeline}\n"
        ),
        FormData::Application {
            position,
            experience,
            portfolio,
            ..
        } => {
            let mut out = format!("Position: {position}\nExperience: {experience}\n");
            if let Some(portfolio) = portfolio {
                out.push_str(&format!("Portfolio: {portfolio}\n"));
            }
            out
        }
    }
}
