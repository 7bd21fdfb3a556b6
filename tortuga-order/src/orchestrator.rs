use std::collections::HashMap;
use std::sync::Arc;
use tortuga_core::payment::{
    Payment, PaymentAdapter, PaymentEvidence, PaymentProvider, ProviderError, WebhookEvent,
    WebhookRequest,
};
use tortuga_core::repository::BookingStore;
use tortuga_core::reservation::ReservationStatus;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::checkout::{CheckoutError, CheckoutService};
use crate::reconciliation::{ConfirmOutcome, ReconcileError, ReconciliationEngine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Confirmed { reservation_id: Uuid, newly_paid: bool },
    Refunded { reservation_id: Uuid, payments_failed: usize },
    /// Accepted without effect: ignored event type, or a business conflict
    /// that redelivery cannot resolve.
    Acknowledged { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Payment provider {0} is not enabled")]
    UnknownProvider(PaymentProvider),

    #[error("Webhook authentication failed")]
    Unverified,

    #[error("Malformed webhook: {0}")]
    Malformed(String),

    #[error("Webhook processing failed, retry later: {0}")]
    Retryable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Payment provider {0} is not enabled")]
    UnknownProvider(PaymentProvider),

    #[error("Invalid PayPal order id: {0:?}")]
    InvalidOrderId(String),

    #[error("Capture not completed (status {0})")]
    NotCompleted(String),

    #[error("Order {order_id} does not belong to reservation {reservation_id}")]
    ReferenceMismatch { order_id: String, reservation_id: Uuid },

    #[error("Order {order_id} captured {captured} minor units, {due} due")]
    Underpaid { order_id: String, captured: i64, due: i64 },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl CaptureError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CaptureError::Provider(ProviderError::RequestFailed(_)) => true,
            CaptureError::Provider(ProviderError::Api { status, .. }) => *status >= 500,
            CaptureError::Reconcile(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Routes provider traffic (webhooks, captures, checkouts) to the engine.
pub struct PaymentOrchestrator {
    adapters: HashMap<PaymentProvider, Arc<dyn PaymentAdapter>>,
    engine: Arc<ReconciliationEngine>,
    checkout: CheckoutService,
}

impl PaymentOrchestrator {
    pub fn new(engine: Arc<ReconciliationEngine>, checkout: CheckoutService) -> Self {
        Self {
            adapters: HashMap::new(),
            engine,
            checkout,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn PaymentAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// Verify, parse and apply one provider notification. The engine never
    /// sees a payload that failed verification.
    pub async fn handle_webhook(
        &self,
        provider: PaymentProvider,
        request: &WebhookRequest,
    ) -> Result<WebhookOutcome, WebhookError> {
        let adapter = self
            .adapters
            .get(&provider)
            .ok_or(WebhookError::UnknownProvider(provider))?;

        match adapter.verify_webhook(request).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(provider = %provider, "Rejected webhook with invalid signature");
                return Err(WebhookError::Unverified);
            }
            Err(e) => return Err(classify_provider_error(provider, e)),
        }

        let event = adapter
            .parse_event(request)
            .await
            .map_err(|e| classify_provider_error(provider, e))?;

        match event {
            WebhookEvent::PaymentSucceeded {
                reservation_id,
                evidence,
            } => match self.engine.confirm_payment(reservation_id, evidence).await {
                Ok(outcome) => Ok(WebhookOutcome::Confirmed {
                    reservation_id,
                    newly_paid: outcome.newly_paid,
                }),
                Err(e) => acknowledge_or_retry(provider, reservation_id, e),
            },
            WebhookEvent::Refunded {
                reservation_id,
                provider: refunded_provider,
                external_id,
                raw,
            } => match self
                .engine
                .mark_refunded(reservation_id, refunded_provider, external_id.as_deref(), raw)
                .await
            {
                Ok(payments_failed) => Ok(WebhookOutcome::Refunded {
                    reservation_id,
                    payments_failed,
                }),
                Err(e) => acknowledge_or_retry(provider, reservation_id, e),
            },
            WebhookEvent::Ignored { event_name, reason } => {
                info!(provider = %provider, event = %event_name, "Webhook ignored: {}", reason);
                Ok(WebhookOutcome::Acknowledged {
                    reason: format!("{event_name}: {reason}"),
                })
            }
        }
    }

    /// Capture an approved PayPal order on the customer's return and
    /// reconcile it synchronously.
    pub async fn capture(&self, reservation_id: Uuid, order_id: &str) -> Result<ConfirmOutcome, CaptureError> {
        if !is_order_id(order_id) {
            warn!(reservation_id = %reservation_id, "Rejected malformed PayPal order id");
            return Err(CaptureError::InvalidOrderId(order_id.to_string()));
        }
        let adapter = self
            .adapters
            .get(&PaymentProvider::PayPal)
            .ok_or(CaptureError::UnknownProvider(PaymentProvider::PayPal))?;

        let reservation = self
            .engine
            .store()
            .get_reservation(reservation_id)
            .await
            .map_err(ReconcileError::from)?
            .ok_or(ReconcileError::NotFound(reservation_id))?;
        match reservation.status {
            ReservationStatus::Paid => {
                return Ok(ConfirmOutcome {
                    reservation,
                    newly_paid: false,
                    ticket_code: None,
                })
            }
            ReservationStatus::Cancelled => return Err(ReconcileError::Cancelled(reservation_id).into()),
            ReservationStatus::Pending | ReservationStatus::AgencyBlocked => {}
        }

        let capture = adapter.capture(order_id).await?;
        if !capture.is_completed() {
            warn!(reservation_id = %reservation_id, order_id, status = %capture.status, "PayPal capture not completed");
            return Err(CaptureError::NotCompleted(capture.status));
        }
        if let Some(custom_id) = &capture.custom_id {
            if custom_id != &reservation_id.to_string() {
                error!(reservation_id = %reservation_id, order_id, custom_id = %custom_id, "Captured order belongs to another reservation");
                return Err(CaptureError::ReferenceMismatch {
                    order_id: capture.order_id,
                    reservation_id,
                });
            }
        }

        if let Some(captured) = capture.amount_cents {
            if captured < reservation.amount_due_cents {
                error!(reservation_id = %reservation_id, order_id, captured, due = reservation.amount_due_cents, "Captured amount below amount due");
                return Err(CaptureError::Underpaid {
                    order_id: capture.order_id,
                    captured,
                    due: reservation.amount_due_cents,
                });
            }
        }

        let evidence = PaymentEvidence::PayPalCapture {
            order_id: capture.order_id,
            payer_email: capture.payer_email,
            raw: capture.raw,
        };
        Ok(self.engine.confirm_payment(reservation_id, evidence).await?)
    }

    /// Staff recorded a cash payment at the counter.
    pub async fn settle_cash(&self, reservation_id: Uuid, collected_by: &str) -> Result<ConfirmOutcome, ReconcileError> {
        let evidence = PaymentEvidence::Cash {
            collected_by: collected_by.to_string(),
        };
        self.engine.confirm_payment(reservation_id, evidence).await
    }

    pub async fn begin_checkout(&self, provider: PaymentProvider, reservation_id: Uuid) -> Result<Payment, CheckoutError> {
        let adapter = self
            .adapters
            .get(&provider)
            .ok_or_else(|| CheckoutError::ProviderDisabled(provider.to_string()))?;
        self.checkout.start(adapter.as_ref(), reservation_id).await
    }
}

/// PayPal order ids are opaque alphanumeric tokens; anything else must not
/// reach a request path.
fn is_order_id(order_id: &str) -> bool {
    !order_id.is_empty()
        && order_id.len() <= 64
        && order_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn classify_provider_error(provider: PaymentProvider, e: ProviderError) -> WebhookError {
    match e {
        ProviderError::Malformed(msg) => {
            warn!(provider = %provider, "Malformed webhook: {}", msg);
            WebhookError::Malformed(msg)
        }
        other => {
            error!(provider = %provider, "Webhook provider call failed: {}", other);
            WebhookError::Retryable(other.to_string())
        }
    }
}

fn acknowledge_or_retry(
    provider: PaymentProvider,
    reservation_id: Uuid,
    e: ReconcileError,
) -> Result<WebhookOutcome, WebhookError> {
    if e.is_retryable() {
        error!(provider = %provider, reservation_id = %reservation_id, "Reconciliation failed, provider will retry: {}", e);
        return Err(WebhookError::Retryable(e.to_string()));
    }
    error!(provider = %provider, reservation_id = %reservation_id, "Reconciliation rejected: {}", e);
    Ok(WebhookOutcome::Acknowledged {
        reason: e.to_string(),
    })
}
