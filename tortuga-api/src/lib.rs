use axum::{
    http::Method,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod middleware;
pub mod payments;
pub mod reservations;
pub mod state;
pub mod webhooks;
pub mod worker;

pub use state::{AppState, AuthConfig};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let booking = Router::new()
        .route("/v1/reservations", post(reservations::create_reservation))
        .route_layer(from_fn_with_state(state.clone(), middleware::optional_auth_middleware));

    let staff = Router::new()
        .route("/v1/staff/reservations/{id}/cash", post(payments::settle_cash))
        .route("/v1/staff/reservations/{id}/cancel", post(payments::cancel_reservation))
        .route_layer(from_fn_with_state(state.clone(), middleware::staff_auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/v1/reservations/{id}", get(reservations::get_reservation))
        .route("/v1/departures/{id}", get(reservations::get_departure))
        .route("/v1/reservations/{id}/checkout/{provider}", post(payments::start_checkout))
        .route("/v1/reservations/{id}/paypal/capture", post(payments::capture_paypal))
        .route("/v1/webhooks/lemonsqueezy", post(webhooks::lemonsqueezy_webhook))
        .route("/v1/webhooks/paypal", post(webhooks::paypal_webhook))
        .merge(booking)
        .merge(staff)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
