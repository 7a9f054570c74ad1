//! Payment requests reconciled against the external gateway.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;

use atrium_providers::PaymentGateway;
use atrium_store::{NewPayment, Store};
use atrium_types::{Amount, CoreError, PaymentId, PaymentRequest, PaymentStatus, TicketId, UserId};

/// Input for a new payment request.
#[derive(Debug, Clone)]
pub struct NewRequest {
    /// Who is being asked to pay.
    pub user_id: UserId,
    pub amount: Amount,
    pub description: String,
    pub ticket_id: Option<TicketId>,
    pub requested_by: UserId,
}

/// A freshly created request plus the gateway's approval link.
#[derive(Debug, Clone)]
pub struct CreatedRequest {
    pub request: PaymentRequest,
    pub approval_url: String,
}

/// Creates payment requests and keeps their stored status in line with the
/// gateway's view of the order.
///
/// Gateway calls are never retried here; a failed call leaves the stored
/// record untouched and the caller free to try again.
pub struct PaymentReconciler<G> {
    store: Arc<Store>,
    gateway: Arc<G>,
    currency: String,
}

impl<G: PaymentGateway> PaymentReconciler<G> {
    pub fn new(store: Arc<Store>, gateway: Arc<G>, currency: impl Into<String>) -> Self {
        Self {
            store,
            gateway,
            currency: currency.into(),
        }
    }

    /// Register an order with the gateway and persist the pending request.
    ///
    /// A non-positive amount is rejected before any external call. The row
    /// is only written once the gateway has accepted the order, so every
    /// stored request carries an order id.
    pub async fn create_request(&self, new: NewRequest) -> Result<CreatedRequest, CoreError> {
        if !new.amount.is_positive() {
            return Err(CoreError::Validation(
                "The payment amount must be greater than zero.".to_string(),
            ));
        }

        let order = self
            .gateway
            .create_order(new.amount, &self.currency, &new.description)
            .await
            .map_err(CoreError::gateway)?;

        let request = self
            .store
            .insert_payment(&NewPayment {
                ticket_id: new.ticket_id,
                user_id: new.user_id,
                amount: new.amount,
                description: new.description,
                gateway_order_id: order.order_id,
                requested_by: new.requested_by,
                created_at: Utc::now(),
            })
            .map_err(CoreError::store)?;

        tracing::info!(
            payment = %request.id,
            order = %request.gateway_order_id,
            amount = %request.amount,
            "payment request created"
        );
        Ok(CreatedRequest {
            request,
            approval_url: order.approval_url,
        })
    }

    /// Ask the gateway for the order's status and persist the transition if
    /// it moves the request forward.
    ///
    /// Re-polling a settled request is a no-op; a gateway status that would
    /// move the request backwards is ignored. Returns the request's status
    /// as stored after reconciliation.
    pub async fn poll_status(&self, id: PaymentId) -> Result<PaymentStatus, CoreError> {
        let payment = self.fetch(id)?;
        let order_status = self
            .gateway
            .get_order(&payment.gateway_order_id)
            .await
            .map_err(CoreError::gateway)?;
        let Some(mapped) = order_status.normalized() else {
            return Err(CoreError::Gateway(anyhow!(
                "gateway returned an unrecognized status for order {}",
                payment.gateway_order_id
            )));
        };

        if mapped == payment.status {
            return Ok(payment.status);
        }
        if !payment.status.can_transition_to(mapped) {
            tracing::debug!(
                payment = %id,
                stored = %payment.status,
                gateway = %mapped,
                "ignoring backwards gateway status"
            );
            return Ok(payment.status);
        }

        let paid_at = (mapped == PaymentStatus::Completed).then(Utc::now);
        self.store
            .set_payment_status(id, mapped, paid_at)
            .map_err(CoreError::store)?;
        tracing::info!(payment = %id, status = %mapped, "payment status reconciled");
        Ok(mapped)
    }

    /// Poll every pending request once, skipping over individual failures.
    pub async fn sweep_pending(&self) -> Result<Vec<(PaymentId, PaymentStatus)>, CoreError> {
        let pending = self
            .store
            .payments_with_status(PaymentStatus::Pending)
            .map_err(CoreError::store)?;
        let mut reconciled = Vec::with_capacity(pending.len());
        for payment in pending {
            match self.poll_status(payment.id).await {
                Ok(status) => reconciled.push((payment.id, status)),
                Err(err) => {
                    tracing::warn!(payment = %payment.id, "sweep poll failed: {err:#}");
                }
            }
        }
        Ok(reconciled)
    }

    /// Manually mark a pending request completed.
    pub fn mark_completed(&self, id: PaymentId) -> Result<PaymentRequest, CoreError> {
        let payment = self.fetch(id)?;
        if !payment.status.can_transition_to(PaymentStatus::Completed) {
            return Err(invalid_state(&payment, "mark completed"));
        }
        self.store
            .set_payment_status(id, PaymentStatus::Completed, Some(Utc::now()))
            .map_err(CoreError::store)?;
        tracing::info!(payment = %id, "payment marked completed");
        self.fetch(id)
    }

    /// Refund a completed request through the gateway.
    ///
    /// Only `completed` requests can be refunded. If the gateway call
    /// fails the stored status is left untouched.
    pub async fn refund(&self, id: PaymentId, reason: &str) -> Result<PaymentRequest, CoreError> {
        let payment = self.fetch(id)?;
        if payment.status != PaymentStatus::Completed {
            return Err(invalid_state(&payment, "refund"));
        }

        self.gateway
            .refund_capture(&payment.gateway_order_id, reason)
            .await
            .map_err(CoreError::gateway)?;

        self.store
            .set_payment_refunded(id, reason, Utc::now())
            .map_err(CoreError::store)?;
        tracing::info!(payment = %id, "payment refunded");
        self.fetch(id)
    }

    /// Remove a payment request outright.
    pub fn delete_request(&self, id: PaymentId) -> Result<(), CoreError> {
        if self.store.delete_payment(id).map_err(CoreError::store)? {
            tracing::info!(payment = %id, "payment request deleted");
            Ok(())
        } else {
            Err(CoreError::not_found("payment request", id))
        }
    }

    fn fetch(&self, id: PaymentId) -> Result<PaymentRequest, CoreError> {
        self.store
            .payment(id)
            .map_err(CoreError::store)?
            .ok_or_else(|| CoreError::not_found("payment request", id))
    }
}

fn invalid_state(payment: &PaymentRequest, operation: &'static str) -> CoreError {
    CoreError::InvalidState {
        entity: "payment request",
        current: payment.status.to_string(),
        operation,
    }
}
