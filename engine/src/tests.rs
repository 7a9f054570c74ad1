//! Scenario tests over in-memory fakes.
//!
//! The store is a real in-memory SQLite database; the chat transport, log
//! sink, and payment gateway are recording fakes.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, TimeZone, Utc};

use atrium_providers::{CreatedOrder, GatewayError, OrderStatus, PaymentGateway};
use atrium_store::Store;
use atrium_types::{
    Actor, Amount, ChannelId, CoreError, FormData, GuildId, Interaction, InteractionKind,
    MessageId, PaymentId, PaymentStatus, RoleId, RoleSet, Ticket, TicketStatus, TicketType,
    UserId,
};

use crate::chat::{ChatGateway, ChatMessage, CreateChannelSpec, HistoryPage, PermissionOverwrite};
use crate::claims::ClaimArbitrator;
use crate::payments::{NewRequest, PaymentReconciler};
use crate::router::Router;
use crate::tickets::{IntakePrompt, TicketLifecycleManager, TicketSettings};
use crate::transcript::{CloseLogEntry, LogSink, Transcript};

// ---------------------------------------------------------------- fakes

#[derive(Default)]
struct FakeChat {
    state: Mutex<FakeChatState>,
}

#[derive(Default)]
struct FakeChatState {
    next_channel: u64,
    created: Vec<CreateChannelSpec>,
    messages: Vec<(String, String)>,
    grants: Vec<(String, PermissionOverwrite)>,
    deleted: Vec<String>,
    history: BTreeMap<String, Vec<HistoryPage>>,
    fail_create: bool,
}

impl FakeChat {
    fn lock(&self) -> MutexGuard<'_, FakeChatState> {
        self.state.lock().unwrap()
    }

    fn serve_history(&self, channel: &ChannelId, pages: Vec<HistoryPage>) {
        self.lock().history.insert(channel.as_str().to_string(), pages);
    }

    fn messages_in(&self, channel: &ChannelId) -> Vec<String> {
        self.lock()
            .messages
            .iter()
            .filter(|(c, _)| c == channel.as_str())
            .map(|(_, content)| content.clone())
            .collect()
    }
}

impl ChatGateway for FakeChat {
    fn create_channel(
        &self,
        spec: &CreateChannelSpec,
    ) -> impl Future<Output = anyhow::Result<ChannelId>> + Send {
        let result = {
            let mut state = self.lock();
            if state.fail_create {
                Err(anyhow!("channel creation refused"))
            } else {
                state.next_channel += 1;
                state.created.push(spec.clone());
                Ok(ChannelId::new(format!("C{}", state.next_channel)))
            }
        };
        async move { result }
    }

    fn delete_channel(&self, channel: &ChannelId) -> impl Future<Output = anyhow::Result<()>> + Send {
        self.lock().deleted.push(channel.as_str().to_string());
        async move { Ok(()) }
    }

    fn set_channel_permission(
        &self,
        channel: &ChannelId,
        overwrite: &PermissionOverwrite,
    ) -> impl Future<Output = anyhow::Result<()>> + Send {
        self.lock()
            .grants
            .push((channel.as_str().to_string(), overwrite.clone()));
        async move { Ok(()) }
    }

    fn send_message(
        &self,
        channel: &ChannelId,
        content: &str,
    ) -> impl Future<Output = anyhow::Result<MessageId>> + Send {
        let id = {
            let mut state = self.lock();
            state
                .messages
                .push((channel.as_str().to_string(), content.to_string()));
            MessageId::new(format!("M{}", state.messages.len()))
        };
        async move { Ok(id) }
    }

    fn fetch_history(
        &self,
        channel: &ChannelId,
        _before: Option<&MessageId>,
    ) -> impl Future<Output = anyhow::Result<HistoryPage>> + Send {
        let page = {
            let mut state = self.lock();
            match state.history.get_mut(channel.as_str()) {
                Some(pages) if !pages.is_empty() => pages.remove(0),
                _ => HistoryPage::default(),
            }
        };
        async move { Ok(page) }
    }
}

#[derive(Default)]
struct FakeSink {
    archived: Mutex<Vec<(String, Transcript, CloseLogEntry)>>,
}

impl LogSink for FakeSink {
    fn archive(
        &self,
        log_channel: &ChannelId,
        transcript: &Transcript,
        entry: &CloseLogEntry,
    ) -> impl Future<Output = anyhow::Result<()>> + Send {
        self.archived.lock().unwrap().push((
            log_channel.as_str().to_string(),
            transcript.clone(),
            entry.clone(),
        ));
        async move { Ok(()) }
    }
}

#[derive(Default)]
struct FakeGateway {
    state: Mutex<FakeGatewayState>,
}

#[derive(Default)]
struct FakeGatewayState {
    next_order: u64,
    create_calls: usize,
    created: Vec<(Amount, String, String)>,
    statuses: BTreeMap<String, OrderStatus>,
    refunds: Vec<(String, String)>,
    fail_refund: bool,
}

impl FakeGateway {
    fn lock(&self) -> MutexGuard<'_, FakeGatewayState> {
        self.state.lock().unwrap()
    }

    fn set_order_status(&self, order_id: &str, status: OrderStatus) {
        self.lock().statuses.insert(order_id.to_string(), status);
    }
}

impl PaymentGateway for FakeGateway {
    fn create_order(
        &self,
        amount: Amount,
        currency: &str,
        description: &str,
    ) -> impl Future<Output = Result<CreatedOrder, GatewayError>> + Send {
        let order = {
            let mut state = self.lock();
            state.create_calls += 1;
            state.next_order += 1;
            state
                .created
                .push((amount, currency.to_string(), description.to_string()));
            let order_id = format!("O{}", state.next_order);
            CreatedOrder {
                approval_url: format!("https://pay.test/approve/{order_id}"),
                order_id,
            }
        };
        async move { Ok(order) }
    }

    fn get_order(
        &self,
        order_id: &str,
    ) -> impl Future<Output = Result<OrderStatus, GatewayError>> + Send {
        let status = self
            .lock()
            .statuses
            .get(order_id)
            .copied()
            .unwrap_or(OrderStatus::Created);
        async move { Ok(status) }
    }

    fn refund_capture(
        &self,
        order_id: &str,
        note: &str,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send {
        let result = {
            let mut state = self.lock();
            if state.fail_refund {
                Err(GatewayError::Http {
                    status: 422,
                    body: "UNPROCESSABLE_ENTITY".to_string(),
                })
            } else {
                state
                    .refunds
                    .push((order_id.to_string(), note.to_string()));
                Ok(())
            }
        };
        async move { result }
    }
}

// -------------------------------------------------------------- fixture

struct Harness {
    store: Arc<Store>,
    chat: Arc<FakeChat>,
    sink: Arc<FakeSink>,
    gateway: Arc<FakeGateway>,
}

impl Harness {
    fn new() -> Self {
        let harness = Self::bare();
        let guild = guild();
        for (key, value) in [
            ("ticket_category", "CAT1"),
            ("log_channel", "LOG1"),
            ("staff_role", r#"["STAFF"]"#),
            // Legacy scalar on purpose; the store normalizes it.
            ("claim_role", "CLAIM"),
            ("support_claim_roles", r#"["CLAIM"]"#),
            ("application_roles", r#"["DEV", "ARTIST"]"#),
        ] {
            harness.store.set_config_value(&guild, key, value).unwrap();
        }
        harness
    }

    fn bare() -> Self {
        Self {
            store: Arc::new(Store::open_in_memory().unwrap()),
            chat: Arc::new(FakeChat::default()),
            sink: Arc::new(FakeSink::default()),
            gateway: Arc::new(FakeGateway::default()),
        }
    }

    fn tickets(&self) -> TicketLifecycleManager<FakeChat, FakeSink> {
        self.tickets_with(TicketSettings {
            close_grace: Duration::from_secs(5),
            offer_ttl: Duration::from_secs(900),
        })
    }

    fn tickets_with(&self, settings: TicketSettings) -> TicketLifecycleManager<FakeChat, FakeSink> {
        TicketLifecycleManager::new(
            Arc::clone(&self.store),
            Arc::clone(&self.chat),
            Arc::clone(&self.sink),
            settings,
        )
    }

    fn payments(&self) -> PaymentReconciler<FakeGateway> {
        PaymentReconciler::new(Arc::clone(&self.store), Arc::clone(&self.gateway), "USD")
    }

    fn router(&self) -> Router<FakeChat, FakeSink, FakeGateway> {
        Router::new(Arc::clone(&self.store), self.tickets(), self.payments())
    }
}

fn guild() -> GuildId {
    GuildId::from("G1")
}

fn roles(ids: &[&str]) -> RoleSet {
    ids.iter().map(|id| RoleId::from(*id)).collect()
}

fn member(id: &str, name: &str, role_ids: &[&str]) -> Actor {
    Actor {
        user_id: UserId::from(id),
        username: name.to_string(),
        roles: roles(role_ids),
        is_admin: false,
    }
}

fn admin(id: &str, name: &str) -> Actor {
    Actor {
        is_admin: true,
        ..member(id, name, &[])
    }
}

fn support_form() -> FormData {
    FormData::Support {
        issue: "login".to_string(),
        description: "cannot sign in".to_string(),
        tried: None,
    }
}

fn interaction(
    kind: InteractionKind,
    actor: Actor,
    channel: &str,
    custom_id: &str,
    fields: &[(&str, &str)],
) -> Interaction {
    Interaction {
        kind,
        actor,
        guild_id: guild(),
        channel_id: ChannelId::from(channel),
        custom_id: custom_id.to_string(),
        payload: fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
    }
}

fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, hour, minute, 0).unwrap()
}

fn message(id: &str, author: &str, at: DateTime<Utc>, content: &str) -> ChatMessage {
    ChatMessage {
        id: MessageId::from(id),
        author: author.to_string(),
        sent_at: at,
        content: content.to_string(),
        attachments: Vec::new(),
    }
}

async fn open_support_ticket(
    manager: &TicketLifecycleManager<FakeChat, FakeSink>,
    opener: &Actor,
) -> Ticket {
    manager
        .submit_intake(&guild(), opener, support_form())
        .await
        .unwrap()
}

// ------------------------------------------------------ ticket intake

#[tokio::test]
async fn support_intake_creates_channel_then_row() {
    let h = Harness::new();
    let manager = h.tickets();
    let opener = member("U1", "Dana K", &[]);

    assert_eq!(
        manager.intake(&guild(), TicketType::Support).unwrap(),
        IntakePrompt::Form(TicketType::Support)
    );

    let ticket = open_support_ticket(&manager, &opener).await;
    assert_eq!(ticket.status, TicketStatus::Open);
    assert_eq!(ticket.user_id.as_str(), "U1");

    let state = h.chat.lock();
    let spec = &state.created[0];
    assert!(spec.name.starts_with("ticket-support-dana-k-"));
    assert_eq!(spec.category.as_ref().unwrap().as_str(), "CAT1");
    let subjects: Vec<&str> = spec.overwrites.iter().map(|o| o.subject.as_str()).collect();
    assert_eq!(subjects, ["G1", "U1", "STAFF"]);
    drop(state);

    let welcome = &h.chat.messages_in(&ticket.channel_id)[0];
    assert!(welcome.contains("Issue: login"));
}

#[tokio::test]
async fn intake_fails_without_category() {
    let h = Harness::bare();
    let manager = h.tickets();

    let err = manager.intake(&guild(), TicketType::Quote).unwrap_err();
    assert!(matches!(err, CoreError::ConfigMissing("ticket_category")));

    let err = manager
        .submit_intake(&guild(), &member("U1", "dana", &[]), support_form())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ConfigMissing(_)));
    assert!(h.chat.lock().created.is_empty());
}

#[tokio::test]
async fn application_flow_consumes_the_offer() {
    let h = Harness::new();
    let manager = h.tickets();
    let applicant = member("U2", "rey", &[]);

    let IntakePrompt::RoleChoice(offered) = manager
        .intake(&guild(), TicketType::Application)
        .unwrap()
    else {
        panic!("expected a role choice");
    };
    assert_eq!(offered, roles(&["ARTIST", "DEV"]));

    manager
        .begin_application_selection(&guild(), &applicant.user_id, &offered)
        .unwrap();

    let form = FormData::Application {
        position: "Developer".to_string(),
        role_id: RoleId::from("DEV"),
        experience: "five years".to_string(),
        portfolio: None,
    };
    let ticket = manager
        .submit_intake(&guild(), &applicant, form.clone())
        .await
        .unwrap();
    assert_eq!(ticket.ticket_type, TicketType::Application);

    // The offer is single-use.
    let err = manager
        .submit_intake(&guild(), &applicant, form)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { entity: "application offer", .. }));
}

#[tokio::test]
async fn expired_offer_rejects_the_submission() {
    let h = Harness::new();
    let manager = h.tickets_with(TicketSettings {
        close_grace: Duration::from_secs(5),
        offer_ttl: Duration::ZERO,
    });
    let applicant = member("U2", "rey", &[]);

    manager
        .begin_application_selection(&guild(), &applicant.user_id, &roles(&["DEV"]))
        .unwrap();

    let err = manager
        .submit_intake(
            &guild(),
            &applicant,
            FormData::Application {
                position: "Developer".to_string(),
                role_id: RoleId::from("DEV"),
                experience: "none".to_string(),
                portfolio: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
    assert!(h.chat.lock().created.is_empty());
}

#[tokio::test]
async fn unoffered_role_rejects_the_submission() {
    let h = Harness::new();
    let manager = h.tickets();
    let applicant = member("U2", "rey", &[]);

    manager
        .begin_application_selection(&guild(), &applicant.user_id, &roles(&["DEV"]))
        .unwrap();

    let err = manager
        .submit_intake(
            &guild(),
            &applicant,
            FormData::Application {
                position: "Moderator".to_string(),
                role_id: RoleId::from("MOD"),
                experience: "none".to_string(),
                portfolio: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

// -------------------------------------------------------------- claims

#[tokio::test(flavor = "multi_thread")]
async fn claim_race_has_exactly_one_winner() {
    let h = Harness::new();
    let manager = h.tickets();
    let ticket = open_support_ticket(&manager, &member("U1", "dana", &[])).await;

    let g = guild();
    let first = member("S1", "kim", &["CLAIM"]);
    let second = member("S2", "lee", &["CLAIM"]);
    let (a, b) = tokio::join!(
        manager.claim(&g, &first, ticket.id),
        manager.claim(&g, &second, ticket.id),
    );

    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser.unwrap_err(), CoreError::AlreadyClaimed));

    let stored = h.store.ticket(ticket.id).unwrap().unwrap();
    assert_eq!(stored.status, TicketStatus::Claimed);
    assert!(stored.claimed_by.is_some());
    assert!(stored.claimed_at.is_some());
}

#[tokio::test]
async fn claim_roles_are_resolved_per_type() {
    let h = Harness::new();
    let arbitrator = ClaimArbitrator::new(Arc::clone(&h.store));
    let generalist = member("S1", "kim", &["CLAIM"]);
    let supporter = member("S2", "lee", &["SUP"]);

    assert!(arbitrator.permits(&guild(), &generalist, TicketType::Support));
    assert!(!arbitrator.permits(&guild(), &supporter, TicketType::Support));

    h.store
        .set_config_value(&guild(), "support_claim_roles", r#"["SUP"]"#)
        .unwrap();
    assert!(!arbitrator.permits(&guild(), &generalist, TicketType::Support));
    assert!(arbitrator.permits(&guild(), &supporter, TicketType::Support));

    // Quote tickets use the generic (legacy scalar) set; admins always pass.
    assert!(arbitrator.permits(&guild(), &generalist, TicketType::Quote));
    assert!(!arbitrator.permits(&guild(), &supporter, TicketType::Quote));
    assert!(arbitrator.permits(&guild(), &admin("A1", "root"), TicketType::Support));
}

#[tokio::test]
async fn unset_dedicated_claim_key_denies_despite_generic_role() {
    let h = Harness::bare();
    h.store
        .set_config_value(&guild(), "claim_role", "CLAIM")
        .unwrap();
    let arbitrator = ClaimArbitrator::new(Arc::clone(&h.store));
    let generalist = member("S1", "kim", &["CLAIM"]);

    // The generic set never stands in for a dedicated key.
    assert!(!arbitrator.permits(&guild(), &generalist, TicketType::Support));
    assert!(!arbitrator.permits(&guild(), &generalist, TicketType::Application));
    assert!(arbitrator.permits(&guild(), &generalist, TicketType::Quote));
}

#[tokio::test]
async fn claim_denied_without_roles_and_after_close() {
    let h = Harness::new();
    let manager = h.tickets();
    let ticket = open_support_ticket(&manager, &member("U1", "dana", &[])).await;

    let err = manager
        .claim(&guild(), &member("S3", "nox", &[]), ticket.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PermissionDenied));

    manager.close(&admin("A1", "root"), ticket.id).await.unwrap();
    let err = manager
        .claim(&guild(), &member("S1", "kim", &["CLAIM"]), ticket.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidState { operation: "claim", .. }
    ));
}

#[tokio::test]
async fn claimer_gains_channel_access() {
    let h = Harness::new();
    let manager = h.tickets();
    let ticket = open_support_ticket(&manager, &member("U1", "dana", &[])).await;

    let claimed = manager
        .claim(&guild(), &member("S1", "kim", &["CLAIM"]), ticket.id)
        .await
        .unwrap();
    assert_eq!(claimed.claimed_by.as_ref().unwrap().as_str(), "S1");

    let state = h.chat.lock();
    let (channel, overwrite) = &state.grants[0];
    assert_eq!(channel, ticket.channel_id.as_str());
    assert_eq!(overwrite.subject, "S1");
    assert!(overwrite.allow.manage);
}

// --------------------------------------------------------------- close

#[tokio::test(start_paused = true)]
async fn close_archives_transcript_then_deletes_the_channel() {
    let h = Harness::new();
    let manager = h.tickets();
    let ticket = open_support_ticket(&manager, &member("U1", "dana", &[])).await;

    // Pages arrive newest-first, as a chat backend serves them.
    h.chat.serve_history(
        &ticket.channel_id,
        vec![
            HistoryPage {
                messages: vec![message("M9", "kim", ts(11, 0), "any errors?")],
                next_before: Some(MessageId::from("M9")),
            },
            HistoryPage {
                messages: vec![message("M3", "dana", ts(10, 0), "it broke")],
                next_before: None,
            },
        ],
    );

    let report = manager.close(&admin("A1", "root"), ticket.id).await.unwrap();
    assert_eq!(report.ticket.status, TicketStatus::Closed);
    assert_eq!(report.ticket.closed_by.as_ref().unwrap().as_str(), "A1");
    assert!(report.warnings.is_empty());
    assert_eq!(report.transcript.file_name, format!("ticket-{}-transcript.txt", ticket.id));
    let broke = report.transcript.content.find("it broke").unwrap();
    let errors = report.transcript.content.find("any errors?").unwrap();
    assert!(broke < errors, "transcript must read oldest to newest");

    let archived = h.sink.archived.lock().unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].0, "LOG1");
    assert_eq!(archived[0].2.closed_by_name, "root");
    drop(archived);

    // The channel outlives the close by the grace period.
    assert!(h.chat.lock().deleted.is_empty());
    report.deletion.finished().await;
    assert_eq!(h.chat.lock().deleted, [ticket.channel_id.as_str()]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_deletion_keeps_the_channel() {
    let h = Harness::new();
    let manager = h.tickets();
    let ticket = open_support_ticket(&manager, &member("U1", "dana", &[])).await;

    let report = manager.close(&admin("A1", "root"), ticket.id).await.unwrap();
    report.deletion.cancel();
    report.deletion.finished().await;

    assert!(h.chat.lock().deleted.is_empty());
    // The closure itself stands.
    let stored = h.store.ticket(ticket.id).unwrap().unwrap();
    assert_eq!(stored.status, TicketStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn close_without_log_channel_still_closes() {
    let h = Harness::bare();
    h.store
        .set_config_value(&guild(), "ticket_category", "CAT1")
        .unwrap();
    let manager = h.tickets();
    let ticket = open_support_ticket(&manager, &member("U1", "dana", &[])).await;

    let report = manager.close(&admin("A1", "root"), ticket.id).await.unwrap();
    assert!(report.warnings.is_empty());
    assert!(h.sink.archived.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn double_close_is_rejected() {
    let h = Harness::new();
    let manager = h.tickets();
    let ticket = open_support_ticket(&manager, &member("U1", "dana", &[])).await;

    let report = manager.close(&admin("A1", "root"), ticket.id).await.unwrap();
    let closed_at = report.ticket.closed_at.unwrap();

    let err = manager.close(&admin("A2", "also-root"), ticket.id).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidState { operation: "close", .. }
    ));

    let stored = h.store.ticket(ticket.id).unwrap().unwrap();
    assert_eq!(stored.closed_at.unwrap(), closed_at);
    assert_eq!(stored.closed_by.as_ref().unwrap().as_str(), "A1");
}

// ------------------------------------------------------------ payments

#[tokio::test]
async fn payment_request_normalizes_the_amount() {
    let h = Harness::new();
    let reconciler = h.payments();

    let created = reconciler
        .create_request(NewRequest {
            user_id: UserId::from("U1"),
            amount: Amount::parse("49.995").unwrap(),
            description: "logo design".to_string(),
            ticket_id: None,
            requested_by: UserId::from("A1"),
        })
        .await
        .unwrap();

    assert_eq!(created.request.amount.to_string(), "50.00");
    assert_eq!(created.request.status, PaymentStatus::Pending);
    assert_eq!(created.request.gateway_order_id, "O1");
    assert_eq!(created.approval_url, "https://pay.test/approve/O1");

    let state = h.gateway.lock();
    assert_eq!(state.created, [(Amount::parse("50").unwrap(), "USD".to_string(), "logo design".to_string())]);
}

#[tokio::test]
async fn non_positive_amount_never_reaches_the_gateway() {
    let h = Harness::new();
    let reconciler = h.payments();

    let err = reconciler
        .create_request(NewRequest {
            user_id: UserId::from("U1"),
            amount: Amount::from_cents(0),
            description: "nothing".to_string(),
            ticket_id: None,
            requested_by: UserId::from("A1"),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Validation(_)));
    assert_eq!(h.gateway.lock().create_calls, 0);
}

#[tokio::test]
async fn poll_moves_forward_only_and_is_idempotent() {
    let h = Harness::new();
    let reconciler = h.payments();
    let created = reconciler
        .create_request(NewRequest {
            user_id: UserId::from("U1"),
            amount: Amount::parse("10").unwrap(),
            description: "work".to_string(),
            ticket_id: None,
            requested_by: UserId::from("A1"),
        })
        .await
        .unwrap();
    let id = created.request.id;

    // Still pending at the gateway: nothing changes.
    assert_eq!(reconciler.poll_status(id).await.unwrap(), PaymentStatus::Pending);

    h.gateway.set_order_status("O1", OrderStatus::Approved);
    assert_eq!(reconciler.poll_status(id).await.unwrap(), PaymentStatus::Completed);
    let paid_at = h.store.payment(id).unwrap().unwrap().paid_at.unwrap();

    // Re-polling a settled request changes nothing.
    assert_eq!(reconciler.poll_status(id).await.unwrap(), PaymentStatus::Completed);
    assert_eq!(h.store.payment(id).unwrap().unwrap().paid_at.unwrap(), paid_at);

    // A backwards gateway status is ignored.
    h.gateway.set_order_status("O1", OrderStatus::Voided);
    assert_eq!(reconciler.poll_status(id).await.unwrap(), PaymentStatus::Completed);
}

#[tokio::test]
async fn voided_order_cancels_a_pending_request() {
    let h = Harness::new();
    let reconciler = h.payments();
    let created = reconciler
        .create_request(NewRequest {
            user_id: UserId::from("U1"),
            amount: Amount::parse("10").unwrap(),
            description: "work".to_string(),
            ticket_id: None,
            requested_by: UserId::from("A1"),
        })
        .await
        .unwrap();

    h.gateway.set_order_status("O1", OrderStatus::Voided);
    assert_eq!(
        reconciler.poll_status(created.request.id).await.unwrap(),
        PaymentStatus::Cancelled
    );
}

#[tokio::test]
async fn unrecognized_gateway_status_is_an_error() {
    let h = Harness::new();
    let reconciler = h.payments();
    let created = reconciler
        .create_request(NewRequest {
            user_id: UserId::from("U1"),
            amount: Amount::parse("10").unwrap(),
            description: "work".to_string(),
            ticket_id: None,
            requested_by: UserId::from("A1"),
        })
        .await
        .unwrap();

    h.gateway.set_order_status("O1", OrderStatus::Unknown);
    let err = reconciler.poll_status(created.request.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Gateway(_)));
    // And the stored record is untouched.
    assert_eq!(
        h.store.payment(created.request.id).unwrap().unwrap().status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn refund_requires_completed_and_survives_gateway_failure() {
    let h = Harness::new();
    let reconciler = h.payments();
    let created = reconciler
        .create_request(NewRequest {
            user_id: UserId::from("U1"),
            amount: Amount::parse("25").unwrap(),
            description: "work".to_string(),
            ticket_id: None,
            requested_by: UserId::from("A1"),
        })
        .await
        .unwrap();
    let id = created.request.id;

    let err = reconciler.refund(id, "changed my mind").await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { operation: "refund", .. }));

    reconciler.mark_completed(id).unwrap();

    h.gateway.lock().fail_refund = true;
    let err = reconciler.refund(id, "changed my mind").await.unwrap_err();
    assert!(matches!(err, CoreError::Gateway(_)));
    assert_eq!(h.store.payment(id).unwrap().unwrap().status, PaymentStatus::Completed);

    h.gateway.lock().fail_refund = false;
    let refunded = reconciler.refund(id, "changed my mind").await.unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.refund_reason.as_deref(), Some("changed my mind"));
    assert_eq!(h.gateway.lock().refunds, [("O1".to_string(), "changed my mind".to_string())]);

    let err = reconciler.refund(id, "again").await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { .. }));
}

#[tokio::test]
async fn sweep_polls_every_pending_request() {
    let h = Harness::new();
    let reconciler = h.payments();
    for n in 1..=2 {
        reconciler
            .create_request(NewRequest {
                user_id: UserId::from("U1"),
                amount: Amount::parse("10").unwrap(),
                description: format!("job {n}"),
                ticket_id: None,
                requested_by: UserId::from("A1"),
            })
            .await
            .unwrap();
    }
    h.gateway.set_order_status("O2", OrderStatus::Completed);

    let reconciled = reconciler.sweep_pending().await.unwrap();
    assert_eq!(reconciled.len(), 2);
    assert_eq!(reconciled[0].1, PaymentStatus::Pending);
    assert_eq!(reconciled[1].1, PaymentStatus::Completed);
}

#[tokio::test]
async fn delete_request_removes_the_row() {
    let h = Harness::new();
    let reconciler = h.payments();
    let created = reconciler
        .create_request(NewRequest {
            user_id: UserId::from("U1"),
            amount: Amount::parse("10").unwrap(),
            description: "work".to_string(),
            ticket_id: None,
            requested_by: UserId::from("A1"),
        })
        .await
        .unwrap();

    reconciler.delete_request(created.request.id).unwrap();
    let err = reconciler.delete_request(created.request.id).unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
    assert!(matches!(
        reconciler.poll_status(created.request.id).await.unwrap_err(),
        CoreError::NotFound { .. }
    ));
}

// -------------------------------------------------------------- router

#[tokio::test]
async fn router_runs_the_pay_flow_inside_a_ticket_channel() {
    let h = Harness::new();
    let router = h.router();
    let ticket = open_support_ticket(&h.tickets(), &member("U1", "dana", &[])).await;

    let reply = router
        .dispatch(&interaction(
            InteractionKind::Command,
            member("S1", "kim", &["STAFF"]),
            ticket.channel_id.as_str(),
            "pay",
            &[("amount", "49.995")],
        ))
        .await;

    assert!(!reply.ephemeral);
    assert!(reply.content.contains("50.00"));
    assert!(reply.content.contains("https://pay.test/approve/O1"));

    let stored = h.store.payment(PaymentId::new(1)).unwrap().unwrap();
    assert_eq!(stored.ticket_id, Some(ticket.id));
    assert_eq!(stored.user_id.as_str(), "U1");
    assert_eq!(stored.requested_by.as_str(), "S1");
}

#[tokio::test]
async fn router_rejects_pay_without_staff_or_ticket() {
    let h = Harness::new();
    let router = h.router();
    let ticket = open_support_ticket(&h.tickets(), &member("U1", "dana", &[])).await;

    let reply = router
        .dispatch(&interaction(
            InteractionKind::Command,
            member("U1", "dana", &[]),
            ticket.channel_id.as_str(),
            "pay",
            &[("amount", "10")],
        ))
        .await;
    assert!(reply.ephemeral);
    assert!(reply.content.contains("permission"));

    let reply = router
        .dispatch(&interaction(
            InteractionKind::Command,
            member("S1", "kim", &["STAFF"]),
            "C999",
            "pay",
            &[("amount", "10")],
        ))
        .await;
    assert!(reply.content.contains("ticket channel"));
    assert_eq!(h.gateway.lock().create_calls, 0);
}

#[tokio::test]
async fn router_request_payment_is_admin_only() {
    let h = Harness::new();
    let router = h.router();

    let reply = router
        .dispatch(&interaction(
            InteractionKind::Command,
            member("S1", "kim", &["STAFF"]),
            "C1",
            "request-payment",
            &[("user", "U7"), ("amount", "15")],
        ))
        .await;
    assert!(reply.content.contains("permission"));

    let reply = router
        .dispatch(&interaction(
            InteractionKind::Command,
            admin("A1", "root"),
            "C1",
            "request-payment",
            &[("user", "U7"), ("amount", "15")],
        ))
        .await;
    assert!(reply.content.contains("https://pay.test/approve/O1"));
    let stored = h.store.payment(PaymentId::new(1)).unwrap().unwrap();
    assert_eq!(stored.user_id.as_str(), "U7");
    assert_eq!(stored.ticket_id, None);
}

#[tokio::test]
async fn router_claim_button_claims_the_ticket() {
    let h = Harness::new();
    let router = h.router();
    let ticket = open_support_ticket(&h.tickets(), &member("U1", "dana", &[])).await;

    let reply = router
        .dispatch(&interaction(
            InteractionKind::Button,
            member("S1", "kim", &["CLAIM"]),
            ticket.channel_id.as_str(),
            &format!("claim_ticket_{}", ticket.id),
            &[],
        ))
        .await;

    assert!(reply.content.contains("claimed by kim"));
    assert_eq!(
        h.store.ticket(ticket.id).unwrap().unwrap().status,
        TicketStatus::Claimed
    );
}

#[tokio::test(start_paused = true)]
async fn router_close_announces_the_grace_period() {
    let h = Harness::new();
    let router = h.router();
    let ticket = open_support_ticket(&h.tickets(), &member("U1", "dana", &[])).await;

    let reply = router
        .dispatch(&interaction(
            InteractionKind::Command,
            admin("A1", "root"),
            ticket.channel_id.as_str(),
            "close",
            &[],
        ))
        .await;

    assert!(reply.content.contains("deleted in 5 seconds"));
    assert_eq!(
        h.store.ticket(ticket.id).unwrap().unwrap().status,
        TicketStatus::Closed
    );
}

#[tokio::test]
async fn router_close_requires_staff() {
    let h = Harness::new();
    let router = h.router();
    let ticket = open_support_ticket(&h.tickets(), &member("U1", "dana", &[])).await;

    // The ticket opener is not staff; closing is denied.
    let reply = router
        .dispatch(&interaction(
            InteractionKind::Button,
            member("U1", "dana", &[]),
            ticket.channel_id.as_str(),
            "close_ticket",
            &[],
        ))
        .await;
    assert!(reply.ephemeral);
    assert!(reply.content.contains("permission"));
    assert_eq!(
        h.store.ticket(ticket.id).unwrap().unwrap().status,
        TicketStatus::Open
    );

    let reply = router
        .dispatch(&interaction(
            InteractionKind::Button,
            member("S1", "kim", &["STAFF"]),
            ticket.channel_id.as_str(),
            "close_ticket",
            &[],
        ))
        .await;
    assert!(reply.content.contains("closed"));
    assert_eq!(
        h.store.ticket(ticket.id).unwrap().unwrap().status,
        TicketStatus::Closed
    );
}

#[tokio::test]
async fn router_pay_button_marks_the_request_completed() {
    let h = Harness::new();
    let router = h.router();
    h.payments()
        .create_request(NewRequest {
            user_id: UserId::from("U1"),
            amount: Amount::parse("10").unwrap(),
            description: "work".to_string(),
            ticket_id: None,
            requested_by: UserId::from("A1"),
        })
        .await
        .unwrap();

    let reply = router
        .dispatch(&interaction(
            InteractionKind::Button,
            member("U1", "dana", &[]),
            "C1",
            "pay_1",
            &[],
        ))
        .await;
    assert!(reply.content.contains("permission"));

    let reply = router
        .dispatch(&interaction(
            InteractionKind::Button,
            member("S1", "kim", &["STAFF"]),
            "C1",
            "pay_1",
            &[],
        ))
        .await;
    assert!(reply.content.contains("marked completed"));
    let stored = h.store.payment(PaymentId::new(1)).unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert!(stored.paid_at.is_some());
}

#[tokio::test]
async fn router_check_payment_button_reports_the_status() {
    let h = Harness::new();
    let router = h.router();
    h.payments()
        .create_request(NewRequest {
            user_id: UserId::from("U1"),
            amount: Amount::parse("10").unwrap(),
            description: "work".to_string(),
            ticket_id: None,
            requested_by: UserId::from("A1"),
        })
        .await
        .unwrap();
    h.gateway.set_order_status("O1", OrderStatus::Completed);

    let reply = router
        .dispatch(&interaction(
            InteractionKind::Button,
            member("U1", "dana", &[]),
            "C1",
            "check_payment_1",
            &[],
        ))
        .await;
    assert!(reply.content.contains("completed"));
}

#[tokio::test]
async fn router_modal_with_missing_field_is_a_validation_error() {
    let h = Harness::new();
    let router = h.router();

    let reply = router
        .dispatch(&interaction(
            InteractionKind::Modal,
            member("U1", "dana", &[]),
            "C1",
            "ticket_modal_support",
            &[("issue", "login")],
        ))
        .await;
    assert!(reply.ephemeral);
    assert!(reply.content.contains("description"));
    assert!(h.chat.lock().created.is_empty());
}

#[tokio::test]
async fn router_ignores_unknown_custom_ids() {
    let h = Harness::new();
    let reply = h
        .router()
        .dispatch(&interaction(
            InteractionKind::Button,
            member("U1", "dana", &[]),
            "C1",
            "launch_missiles",
            &[],
        ))
        .await;
    assert!(reply.ephemeral);
    assert!(reply.content.contains("not recognized"));
}
