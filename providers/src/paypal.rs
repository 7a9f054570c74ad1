//! PayPal Orders v2 / Payments v2 REST client.
//!
//! Authentication uses the OAuth2 client-credentials flow; the access token
//! is cached until shortly before its reported expiry and refreshed behind
//! a mutex so concurrent callers share one refresh.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use atrium_types::Amount;

use crate::{CreatedOrder, GatewayError, OrderStatus, PaymentGateway, error_body, http_client};

/// Canonical PayPal sandbox REST endpoint.
pub const PAYPAL_SANDBOX_API_URL: &str = "https://api-m.sandbox.paypal.com";
/// Canonical PayPal live REST endpoint.
pub const PAYPAL_LIVE_API_URL: &str = "https://api-m.paypal.com";

/// Refresh the cached token this long before its reported expiry.
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

/// Everything needed to talk to one PayPal environment.
#[derive(Debug, Clone)]
pub struct PayPalConfig {
    /// REST base URL (sandbox, live, or a test server).
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Brand name shown on the approval page.
    pub brand_name: String,
    pub return_url: String,
    pub cancel_url: String,
}

/// PayPal REST client implementing [`PaymentGateway`].
pub struct PayPalClient {
    http: reqwest::Client,
    config: PayPalConfig,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    refresh_after: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    intent: &'static str,
    application_context: ApplicationContext<'a>,
    purchase_units: [PurchaseUnit<'a>; 1],
}

#[derive(Serialize)]
struct ApplicationContext<'a> {
    return_url: &'a str,
    cancel_url: &'a str,
    brand_name: &'a str,
    landing_page: &'static str,
    user_action: &'static str,
}

#[derive(Serialize)]
struct PurchaseUnit<'a> {
    amount: OrderAmount<'a>,
    description: &'a str,
}

#[derive(Serialize)]
struct OrderAmount<'a> {
    currency_code: &'a str,
    value: String,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<OrderLink>,
}

#[derive(Deserialize)]
struct OrderLink {
    rel: String,
    href: String,
}

#[derive(Deserialize)]
struct OrderStatusResponse {
    status: OrderStatus,
}

#[derive(Serialize)]
struct RefundBody<'a> {
    note_to_payer: &'a str,
}

impl PayPalClient {
    #[must_use]
    pub fn new(config: PayPalConfig) -> Self {
        Self {
            http: http_client().clone(),
            config,
            token: Mutex::new(None),
        }
    }

    /// Fetch or reuse the OAuth2 access token.
    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_after
        {
            return Ok(token.access_token.clone());
        }

        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.config.base_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(GatewayError::Auth(format!("HTTP {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("token response: {e}")))?;

        let lifetime = token
            .expires_in
            .saturating_sub(TOKEN_EXPIRY_MARGIN_SECS)
            .max(1);
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            refresh_after: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(access_token)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = error_body(response).await;
            Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            })
        }
    }
}

impl PaymentGateway for PayPalClient {
    fn create_order(
        &self,
        amount: Amount,
        currency: &str,
        description: &str,
    ) -> impl Future<Output = Result<CreatedOrder, GatewayError>> + Send {
        async move {
            let token = self.access_token().await?;
            let body = CreateOrderBody {
                intent: "CAPTURE",
                application_context: ApplicationContext {
                    return_url: &self.config.return_url,
                    cancel_url: &self.config.cancel_url,
                    brand_name: &self.config.brand_name,
                    landing_page: "NO_PREFERENCE",
                    user_action: "PAY_NOW",
                },
                purchase_units: [PurchaseUnit {
                    amount: OrderAmount {
                        currency_code: currency,
                        value: amount.to_string(),
                    },
                    description,
                }],
            };

            let response = self
                .http
                .post(format!("{}/v2/checkout/orders", self.config.base_url))
                .bearer_auth(&token)
                .header("Prefer", "return=representation")
                .json(&body)
                .send()
                .await?;
            let response = Self::check_status(response).await?;

            let order: OrderResponse = response
                .json()
                .await
                .map_err(|e| GatewayError::Decode(format!("create order response: {e}")))?;

            let approval_url = order
                .links
                .iter()
                .find(|link| link.rel == "approve")
                .map(|link| link.href.clone())
                .ok_or_else(|| {
                    GatewayError::Decode(format!("order {} has no approval link", order.id))
                })?;

            tracing::debug!(order_id = %order.id, "Created gateway order");
            Ok(CreatedOrder {
                order_id: order.id,
                approval_url,
            })
        }
    }

    fn get_order(
        &self,
        order_id: &str,
    ) -> impl Future<Output = Result<OrderStatus, GatewayError>> + Send {
        async move {
            let token = self.access_token().await?;
            let response = self
                .http
                .get(format!(
                    "{}/v2/checkout/orders/{order_id}",
                    self.config.base_url
                ))
                .bearer_auth(&token)
                .send()
                .await?;
            let response = Self::check_status(response).await?;

            let order: OrderStatusResponse = response
                .json()
                .await
                .map_err(|e| GatewayError::Decode(format!("order status response: {e}")))?;
            Ok(order.status)
        }
    }

    fn refund_capture(
        &self,
        order_id: &str,
        note: &str,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send {
        async move {
            let token = self.access_token().await?;
            let response = self
                .http
                .post(format!(
                    "{}/v2/payments/captures/{order_id}/refund",
                    self.config.base_url
                ))
                .bearer_auth(&token)
                .json(&RefundBody { note_to_payer: note })
                .send()
                .await?;
            Self::check_status(response).await?;

            tracing::debug!(order_id = %order_id, "Refunded gateway capture");
            Ok(())
        }
    }
}
