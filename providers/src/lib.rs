//! External payment gateway clients.
//!
//! # Architecture
//!
//! The crate exposes one seam, [`PaymentGateway`], consumed by the
//! reconciliation engine:
//!
//! - [`PaymentGateway::create_order`] - register a payment intent and get
//!   back the gateway's order id plus the buyer approval URL
//! - [`PaymentGateway::get_order`] - read the current order status
//! - [`PaymentGateway::refund_capture`] - refund a captured order
//!
//! [`paypal::PayPalClient`] is the production implementation (PayPal Orders
//! v2 / Payments v2 REST, OAuth2 client-credentials). Tests stub the trait.
//!
//! # Error Handling
//!
//! Every call resolves to a [`GatewayError`]. The gateway is never retried
//! here: the callers' contract is that a failed external call surfaces to a
//! human who may re-invoke the operation.

pub mod paypal;

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use thiserror::Error;

use atrium_types::{Amount, PaymentStatus};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 30;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Shared HTTP client for gateway calls: connect and request timeouts, no
/// redirects. The scheme comes from the configured base URL, so plain HTTP
/// stays possible against a local test server.
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        base_client_builder().build().unwrap_or_else(|e| {
            tracing::error!(
                "Failed to build gateway HTTP client: {e}. Attempting minimal fallback."
            );
            reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("Minimal HTTP client must build; cannot proceed without a client")
        })
    })
}

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
}

/// A failed gateway call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failure reaching the gateway.
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The gateway answered with a non-success status.
    #[error("gateway returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Authentication against the gateway failed.
    #[error("gateway authentication failed: {0}")]
    Auth(String),

    /// The gateway's response could not be understood.
    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

/// Order states the gateway reports.
///
/// Anything outside this set decodes to `Unknown` and is treated as a
/// gateway failure by callers; no retry policy is inferred for terminal
/// decline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    Saved,
    Approved,
    Voided,
    Completed,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Map the gateway state onto the reconciler's payment status.
    ///
    /// `APPROVED` and `COMPLETED` both count as completed; `None` means the
    /// state has no documented mapping.
    #[must_use]
    pub const fn normalized(self) -> Option<PaymentStatus> {
        match self {
            OrderStatus::Created | OrderStatus::Saved => Some(PaymentStatus::Pending),
            OrderStatus::Approved | OrderStatus::Completed => Some(PaymentStatus::Completed),
            OrderStatus::Voided => Some(PaymentStatus::Cancelled),
            OrderStatus::Unknown => None,
        }
    }
}

/// A freshly created gateway order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    pub order_id: String,
    /// URL the payer visits to approve the order.
    pub approval_url: String,
}

/// The external payment provider, as the reconciler sees it.
pub trait PaymentGateway: Send + Sync {
    /// Register a payment intent with the gateway.
    fn create_order(
        &self,
        amount: Amount,
        currency: &str,
        description: &str,
    ) -> impl Future<Output = Result<CreatedOrder, GatewayError>> + Send;

    /// Read the current status of an order.
    fn get_order(
        &self,
        order_id: &str,
    ) -> impl Future<Output = Result<OrderStatus, GatewayError>> + Send;

    /// Refund a captured order, passing a note to the payer.
    fn refund_capture(
        &self,
        order_id: &str,
        note: &str,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

pub(crate) async fn error_body(response: reqwest::Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY_BYTES {
        let mut end = MAX_ERROR_BODY_BYTES;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
