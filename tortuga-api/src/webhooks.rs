use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tortuga_core::payment::{PaymentProvider, WebhookRequest};
use tortuga_order::{WebhookError, WebhookOutcome};

use crate::state::AppState;

fn webhook_request(headers: &HeaderMap, body: Bytes) -> WebhookRequest {
    let mut request = WebhookRequest::new(body.to_vec());
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    request
}

/// 200 once the event is applied or deliberately acknowledged, 400 when the
/// payload cannot be trusted, 500 when the provider should redeliver.
async fn dispatch(state: &AppState, provider: PaymentProvider, headers: HeaderMap, body: Bytes) -> Response {
    let request = webhook_request(&headers, body);

    match state.orchestrator.handle_webhook(provider, &request).await {
        Ok(outcome) => {
            let body = match outcome {
                WebhookOutcome::Confirmed {
                    reservation_id,
                    newly_paid,
                } => json!({ "status": "confirmed", "reservation_id": reservation_id, "newly_paid": newly_paid }),
                WebhookOutcome::Refunded {
                    reservation_id,
                    payments_failed,
                } => json!({ "status": "refunded", "reservation_id": reservation_id, "payments_failed": payments_failed }),
                WebhookOutcome::Acknowledged { reason } => json!({ "status": "acknowledged", "reason": reason }),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e @ (WebhookError::Unverified | WebhookError::Malformed(_))) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(e @ WebhookError::UnknownProvider(_)) => {
            tracing::error!("Webhook for disabled provider: {}", e);
            (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(e @ WebhookError::Retryable(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

/// POST /v1/webhooks/lemonsqueezy
pub async fn lemonsqueezy_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    tracing::info!("Received Lemon Squeezy webhook ({} bytes)", body.len());
    dispatch(&state, PaymentProvider::LemonSqueezy, headers, body).await
}

/// POST /v1/webhooks/paypal
pub async fn paypal_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    tracing::info!("Received PayPal webhook ({} bytes)", body.len());
    dispatch(&state, PaymentProvider::PayPal, headers, body).await
}
