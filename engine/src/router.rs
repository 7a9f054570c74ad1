//! Maps inbound interactions onto engine operations.
//!
//! Custom ids follow the shapes the transport registers its components
//! with: `create_{type}`, `ticket_modal_{type}`, `claim_ticket_{id}`,
//! `pay_{id}`, `check_payment_{id}`, `delete_payment_{id}`, plus the
//! `pay`, `request-payment`, and `close` commands.

use std::sync::Arc;

use atrium_providers::PaymentGateway;
use atrium_store::Store;
use atrium_types::{
    Amount, Capability, CoreError, FormData, Interaction, PaymentId, RoleId, Ticket, TicketId,
    TicketType,
};

use crate::chat::ChatGateway;
use crate::payments::{NewRequest, PaymentReconciler};
use crate::permissions::PermissionGate;
use crate::tickets::{IntakePrompt, TicketLifecycleManager};
use crate::transcript::LogSink;

/// What the transport should say back, and to whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    /// Visible only to the acting user when true.
    pub ephemeral: bool,
}

impl Reply {
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }

    pub fn public(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: false,
        }
    }
}

/// Front door for every interaction the transport forwards.
pub struct Router<C, L, G> {
    store: Arc<Store>,
    gate: PermissionGate,
    tickets: TicketLifecycleManager<C, L>,
    payments: PaymentReconciler<G>,
}

impl<C, L, G> Router<C, L, G>
where
    C: ChatGateway + 'static,
    L: LogSink,
    G: PaymentGateway,
{
    pub fn new(
        store: Arc<Store>,
        tickets: TicketLifecycleManager<C, L>,
        payments: PaymentReconciler<G>,
    ) -> Self {
        Self {
            gate: PermissionGate::new(Arc::clone(&store)),
            store,
            tickets,
            payments,
        }
    }

    /// Route an interaction and turn any failure into its user-facing
    /// message. Internal failures are logged with full context here, once.
    pub async fn dispatch(&self, interaction: &Interaction) -> Reply {
        match self.route(interaction).await {
            Ok(reply) => reply,
            Err(err) => {
                match &err {
                    CoreError::Store(inner)
                    | CoreError::Gateway(inner)
                    | CoreError::Chat(inner) => {
                        tracing::error!(
                            kind = %interaction.kind,
                            custom_id = %interaction.custom_id,
                            user = %interaction.actor.user_id,
                            "interaction failed: {inner:#}"
                        );
                    }
                    other => {
                        tracing::debug!(
                            kind = %interaction.kind,
                            custom_id = %interaction.custom_id,
                            user = %interaction.actor.user_id,
                            "interaction rejected: {other}"
                        );
                    }
                }
                Reply::ephemeral(err.user_message())
            }
        }
    }

    async fn route(&self, interaction: &Interaction) -> Result<Reply, CoreError> {
        let custom_id = interaction.custom_id.as_str();

        if let Some(raw) = custom_id.strip_prefix("create_") {
            if let Ok(ticket_type) = TicketType::parse(raw) {
                return self.handle_create(interaction, ticket_type);
            }
        }
        if custom_id == "application_position" {
            return Ok(Reply::ephemeral(
                "Now fill out the application form for your chosen position.",
            ));
        }
        if let Some(raw) = custom_id.strip_prefix("ticket_modal_") {
            if let Ok(ticket_type) = TicketType::parse(raw) {
                return self.handle_intake_form(interaction, ticket_type).await;
            }
        }
        if let Some(raw) = custom_id.strip_prefix("claim_ticket_") {
            return self.handle_claim(interaction, parse_id(raw, "ticket")?).await;
        }
        if custom_id == "close_ticket" || custom_id == "close" {
            return self.handle_close(interaction).await;
        }
        if custom_id == "pay" {
            return self.handle_pay(interaction).await;
        }
        if let Some(raw) = custom_id.strip_prefix("pay_") {
            self.gate
                .require(&interaction.guild_id, &interaction.actor, Capability::Staff)?;
            let id = PaymentId::new(parse_id(raw, "payment request")?);
            let payment = self.payments.mark_completed(id)?;
            return Ok(Reply::public(format!(
                "Payment request #{} marked completed.",
                payment.id
            )));
        }
        if custom_id == "request-payment" {
            return self.handle_request_payment(interaction).await;
        }
        if let Some(raw) = custom_id.strip_prefix("check_payment_") {
            let id = PaymentId::new(parse_id(raw, "payment request")?);
            let status = self.payments.poll_status(id).await?;
            return Ok(Reply::ephemeral(format!("Payment request #{id} is {status}.")));
        }
        if let Some(raw) = custom_id.strip_prefix("delete_payment_") {
            self.gate
                .require(&interaction.guild_id, &interaction.actor, Capability::Staff)?;
            let id = PaymentId::new(parse_id(raw, "payment request")?);
            self.payments.delete_request(id)?;
            return Ok(Reply::ephemeral(format!("Payment request #{id} deleted.")));
        }

        tracing::warn!(
            kind = %interaction.kind,
            custom_id = %interaction.custom_id,
            "unrecognized interaction"
        );
        Ok(Reply::ephemeral("This action is not recognized."))
    }

    fn handle_create(
        &self,
        interaction: &Interaction,
        ticket_type: TicketType,
    ) -> Result<Reply, CoreError> {
        match self.tickets.intake(&interaction.guild_id, ticket_type)? {
            IntakePrompt::Form(ty) => {
                Ok(Reply::ephemeral(format!("Please fill out the {ty} form.")))
            }
            IntakePrompt::RoleChoice(offered) => {
                self.tickets.begin_application_selection(
                    &interaction.guild_id,
                    &interaction.actor.user_id,
                    &offered,
                )?;
                Ok(Reply::ephemeral(
                    "Select the position you are applying for.",
                ))
            }
        }
    }

    async fn handle_intake_form(
        &self,
        interaction: &Interaction,
        ticket_type: TicketType,
    ) -> Result<Reply, CoreError> {
        let form = build_form(interaction, ticket_type)?;
        let ticket = self
            .tickets
            .submit_intake(&interaction.guild_id, &interaction.actor, form)
            .await?;
        Ok(Reply::ephemeral(format!(
            "Your {} ticket has been created: <#{}>",
            ticket.ticket_type, ticket.channel_id
        )))
    }

    async fn handle_claim(&self, interaction: &Interaction, raw_id: i64) -> Result<Reply, CoreError> {
        let ticket = self
            .tickets
            .claim(
                &interaction.guild_id,
                &interaction.actor,
                TicketId::new(raw_id),
            )
            .await?;
        Ok(Reply::public(format!(
            "Ticket #{} claimed by {}.",
            ticket.id, interaction.actor.username
        )))
    }

    async fn handle_close(&self, interaction: &Interaction) -> Result<Reply, CoreError> {
        self.gate
            .require(&interaction.guild_id, &interaction.actor, Capability::Staff)?;
        let ticket = self.ticket_here(interaction)?;
        let report = self.tickets.close(&interaction.actor, ticket.id).await?;
        let mut content = format!(
            "Ticket #{} closed. This channel will be deleted in {} seconds.",
            report.ticket.id,
            report.deletion.delay().as_secs()
        );
        for warning in &report.warnings {
            content.push_str("\nNote: ");
            content.push_str(warning);
        }
        Ok(Reply::public(content))
    }

    async fn handle_pay(&self, interaction: &Interaction) -> Result<Reply, CoreError> {
        self.gate
            .require(&interaction.guild_id, &interaction.actor, Capability::Staff)?;
        let ticket = self.ticket_here(interaction)?;

        let amount = parse_amount(required_field(interaction, "amount")?)?;
        let description = interaction
            .field("description")
            .map_or_else(|| format!("Payment for ticket #{}", ticket.id), String::from);

        let created = self
            .payments
            .create_request(NewRequest {
                user_id: ticket.user_id.clone(),
                amount,
                description,
                ticket_id: Some(ticket.id),
                requested_by: interaction.actor.user_id.clone(),
            })
            .await?;
        Ok(Reply::public(payment_reply(&created)))
    }

    async fn handle_request_payment(&self, interaction: &Interaction) -> Result<Reply, CoreError> {
        if !interaction.actor.is_admin {
            return Err(CoreError::PermissionDenied);
        }
        let user_id = required_field(interaction, "user")?;
        let amount = parse_amount(required_field(interaction, "amount")?)?;
        let description = interaction
            .field("description")
            .map_or_else(|| "Payment request".to_string(), String::from);

        let created = self
            .payments
            .create_request(NewRequest {
                user_id: user_id.into(),
                amount,
                description,
                ticket_id: None,
                requested_by: interaction.actor.user_id.clone(),
            })
            .await?;
        Ok(Reply::public(payment_reply(&created)))
    }

    /// The ticket living in the interaction's channel.
    fn ticket_here(&self, interaction: &Interaction) -> Result<Ticket, CoreError> {
        self.store
            .ticket_by_channel(&interaction.channel_id)
            .map_err(CoreError::store)?
            .filter(|ticket| !ticket.status.is_terminal())
            .ok_or_else(|| {
                CoreError::Validation(
                    "This can only be used inside an open ticket channel.".to_string(),
                )
            })
    }
}

fn payment_reply(created: &crate::payments::CreatedRequest) -> String {
    format!(
        "Payment request #{} for {} created.\nPay here: {}",
        created.request.id, created.request.amount, created.approval_url
    )
}

fn required_field<'a>(interaction: &'a Interaction, name: &'static str) -> Result<&'a str, CoreError> {
    interaction
        .field(name)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| CoreError::Validation(format!("The {name} field is required.")))
}

fn optional_field(interaction: &Interaction, name: &str) -> Option<String> {
    interaction
        .field(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
}

fn parse_amount(raw: &str) -> Result<Amount, CoreError> {
    Amount::parse(raw)
        .map_err(|_| CoreError::Validation("Enter a valid amount, like 49.99.".to_string()))
}

fn parse_id(raw: &str, entity: &'static str) -> Result<i64, CoreError> {
    raw.parse()
        .map_err(|_| CoreError::not_found(entity, raw))
}

fn build_form(interaction: &Interaction, ticket_type: TicketType) -> Result<FormData, CoreError> {
    Ok(match ticket_type {
        TicketType::Support => FormData::Support {
            issue: required_field(interaction, "issue")?.to_string(),
            description: required_field(interaction, "description")?.to_string(),
            tried: optional_field(interaction, "tried"),
        },
        TicketType::Quote => FormData::Quote {
            project_description: required_field(interaction, "project_description")?.to_string(),
            budget: required_field(interaction, "budget")?.to_string(),
            timeline: required_field(interaction, "timeline")?.to_string(),
        },
        TicketType::Application => FormData::Application {
            position: required_field(interaction, "position")?.to_string(),
            role_id: RoleId::from(required_field(interaction, "role_id")?),
            experience: required_field(interaction, "experience")?.to_string(),
            portfolio: optional_field(interaction, "portfolio"),
        },
    })
}
