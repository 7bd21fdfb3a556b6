use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tortuga_core::payment::PaymentProvider;
use tortuga_core::repository::BookingStore;
use tortuga_order::ConfirmOutcome;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::Claims;
use crate::reservations::ReservationResponse;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub payment_id: Uuid,
    pub provider: PaymentProvider,
    pub external_id: String,
    pub checkout_url: Option<String>,
}

/// POST /v1/reservations/{id}/checkout/{provider}
pub async fn start_checkout(
    State(state): State<AppState>,
    Path((id, provider)): Path<(Uuid, String)>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let provider = match provider.parse::<PaymentProvider>() {
        Ok(p) if p != PaymentProvider::Cash => p,
        _ => return Err(AppError::ValidationError(format!("unsupported checkout provider {provider}"))),
    };

    let payment = state.orchestrator.begin_checkout(provider, id).await?;
    Ok(Json(CheckoutResponse {
        payment_id: payment.id,
        provider: payment.provider,
        external_id: payment.external_id,
        checkout_url: payment.checkout_url,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    #[serde(rename = "orderID")]
    pub order_id: String,
}

/// POST /v1/reservations/{id}/paypal/capture
///
/// Answers `{ok, redirect_url}`, or `{error}` with 400 when retrying cannot
/// help and 500 when it can.
pub async fn capture_paypal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<CaptureRequest>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            let message = format!("invalid capture request: {}", rejection.body_text());
            tracing::warn!(reservation_id = %id, "{}", message);
            return capture_error(StatusCode::BAD_REQUEST, &message);
        }
    };
    let order_id = payload.order_id.trim();
    if order_id.is_empty() {
        return capture_error(StatusCode::BAD_REQUEST, "orderID is required");
    }

    match state.orchestrator.capture(id, order_id).await {
        Ok(outcome) => {
            tracing::info!(
                reservation_id = %id,
                order_id,
                newly_paid = outcome.newly_paid,
                "PayPal capture reconciled"
            );
            Json(json!({
                "ok": true,
                "redirect_url": format!("{}/?pago=ok", state.payments.site_url()),
            }))
            .into_response()
        }
        Err(e) if e.is_retryable() => {
            tracing::error!(reservation_id = %id, order_id, "PayPal capture failed: {}", e);
            capture_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
        Err(e) => {
            tracing::warn!(reservation_id = %id, order_id, "PayPal capture rejected: {}", e);
            capture_error(StatusCode::BAD_REQUEST, &e.to_string())
        }
    }
}

fn capture_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SettlementResponse {
    pub newly_paid: bool,
    pub ticket_code: Option<String>,
    pub reservation: ReservationResponse,
}

async fn settlement(state: &AppState, outcome: ConfirmOutcome) -> Result<SettlementResponse, AppError> {
    let payments = state.store.list_payments(outcome.reservation.id).await?;
    Ok(SettlementResponse {
        newly_paid: outcome.newly_paid,
        ticket_code: outcome.ticket_code,
        reservation: ReservationResponse::new(&outcome.reservation, &payments, state.payments.currency()),
    })
}

/// POST /v1/staff/reservations/{id}/cash
pub async fn settle_cash(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<SettlementResponse>, AppError> {
    let outcome = state.orchestrator.settle_cash(id, &claims.sub).await?;
    Ok(Json(settlement(&state, outcome).await?))
}

/// POST /v1/staff/reservations/{id}/cancel
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationResponse>, AppError> {
    let reservation = state.orchestrator.engine().cancel_reservation(id).await?;
    tracing::info!(reservation_id = %id, cancelled_by = %claims.sub, "Reservation cancelled by staff");

    let payments = state.store.list_payments(id).await?;
    Ok(Json(ReservationResponse::new(&reservation, &payments, state.payments.currency())))
}
