use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tortuga_api::middleware::Claims;
use tortuga_api::{app, AppState, AuthConfig};
use tortuga_catalog::{Departure, Tour, TourPricing};
use tortuga_core::config::{AgencyPolicy, LemonSqueezySettings, PayPalSettings, PaymentSettings};
use tortuga_core::notify::LogNotifier;
use tortuga_order::providers::lemonsqueezy::{sign, SIGNATURE_HEADER};
use tortuga_store::MemoryBookingStore;
use tower::ServiceExt;
use uuid::Uuid;

const JWT_SECRET: &str = "test-jwt-secret";
const WEBHOOK_SECRET: &str = "ls-webhook-secret";

fn settings() -> PaymentSettings {
    PaymentSettings {
        currency: "usd".into(),
        site_url: "https://tours.example/".into(),
        lemonsqueezy: LemonSqueezySettings {
            webhook_secret: WEBHOOK_SECRET.into(),
            ..LemonSqueezySettings::default()
        },
        paypal: PayPalSettings::default(),
    }
}

async fn setup(capacity: u32) -> (Router, Departure) {
    let store = Arc::new(MemoryBookingStore::new());
    let tour = Tour::new("Isla de la Plata", TourPricing::new(5000, 2500));
    let departure = Departure::new(&tour, (Utc::now() + Duration::days(30)).date_naive(), None, capacity);
    store.add_departure(departure.clone()).await;

    let state = AppState::new(
        store,
        Arc::new(LogNotifier),
        settings(),
        AgencyPolicy::default(),
        AuthConfig {
            secret: JWT_SECRET.into(),
        },
    );
    (app(state), departure)
}

fn token(role: &str, sub: &str) -> String {
    let claims = Claims {
        sub: sub.into(),
        email: Some(format!("{sub}@tours.example")),
        role: role.into(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: &Value, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn lemonsqueezy_order(reservation_id: &str, order_id: u64) -> Request<Body> {
    let body = serde_json::to_vec(&json!({
        "meta": { "event_name": "order_created", "custom_data": { "reserva_id": reservation_id } },
        "data": { "id": order_id, "attributes": { "user_email": "buyer@mail.example" } }
    }))
    .unwrap();
    Request::builder()
        .method("POST")
        .uri("/v1/webhooks/lemonsqueezy")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, sign(WEBHOOK_SECRET, &body))
        .body(Body::from(body))
        .unwrap()
}

fn traveller() -> Value {
    json!({
        "name": "Ana",
        "surname": "Paredes",
        "email": "ana@example.com",
        "phone": "+593 99 000 0000",
        "identification": "0102030405"
    })
}

async fn remaining(app: &Router, departure_id: Uuid) -> u64 {
    let (status, body) = send(app, get(&format!("/v1/departures/{departure_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    body["capacity_remaining"].as_u64().unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _) = setup(10).await;
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_webhook_payment_is_applied_once() {
    let (app, departure) = setup(10).await;

    let (status, created) = send(
        &app,
        post_json(
            "/v1/reservations",
            &json!({ "departure_id": departure.id, "adult_count": 3, "customer": traveller() }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    assert_eq!(created["amount_due"], "150.00");
    assert!(created.get("customer").is_none());
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(remaining(&app, departure.id).await, 10);

    let (status, first) = send(&app, lemonsqueezy_order(&id, 9001)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "confirmed");
    assert_eq!(first["newly_paid"], true);
    assert_eq!(remaining(&app, departure.id).await, 7);

    let (status, second) = send(&app, lemonsqueezy_order(&id, 9001)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["newly_paid"], false);
    assert_eq!(remaining(&app, departure.id).await, 7);

    let (status, reservation) = send(&app, get(&format!("/v1/reservations/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reservation["status"], "paid");
    let payments = reservation["payments"].as_array().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0]["status"], "paid");
    assert_eq!(payments[0]["external_id"], "9001");
}

#[tokio::test]
async fn test_agency_block_then_cash_keeps_capacity() {
    let (app, departure) = setup(10).await;

    let (status, created) = send(
        &app,
        post_json(
            "/v1/reservations",
            &json!({
                "departure_id": departure.id,
                "adult_count": 5,
                "customer": { "name": "" },
                "agency_code": "VCH-889"
            }),
            Some(&token("AGENCY", "agency-7")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "agency_blocked");
    assert!(created["agency_payment_deadline"].is_string());
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(remaining(&app, departure.id).await, 5);

    let (status, settled) = send(
        &app,
        post_json(
            &format!("/v1/staff/reservations/{id}/cash"),
            &json!({}),
            Some(&token("SECRETARY", "sec-1")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settled["newly_paid"], true);
    assert!(settled["ticket_code"].as_str().unwrap().starts_with("TKT-"));
    assert_eq!(settled["reservation"]["status"], "paid");
    assert_eq!(settled["reservation"]["payments"][0]["provider"], "cash");
    assert_eq!(remaining(&app, departure.id).await, 5);
}

#[tokio::test]
async fn test_unsigned_webhook_rejected() {
    let (app, departure) = setup(10).await;
    let (_, created) = send(
        &app,
        post_json(
            "/v1/reservations",
            &json!({ "departure_id": departure.id, "adult_count": 1, "customer": traveller() }),
            None,
        ),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let body = json!({
        "meta": { "event_name": "order_created", "custom_data": { "reserva_id": id } },
        "data": { "id": 1 }
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/webhooks/lemonsqueezy")
        .header(SIGNATURE_HEADER, sign("wrong-secret", body.to_string().as_bytes()))
        .body(Body::from(body.to_string()))
        .unwrap();

    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(remaining(&app, departure.id).await, 10);
}

#[tokio::test]
async fn test_cancelled_reservation_webhook_is_acknowledged() {
    let (app, departure) = setup(10).await;
    let (_, created) = send(
        &app,
        post_json(
            "/v1/reservations",
            &json!({ "departure_id": departure.id, "adult_count": 2, "customer": traveller() }),
            None,
        ),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, cancelled) = send(
        &app,
        post_json(
            &format!("/v1/staff/reservations/{id}/cancel"),
            &json!({}),
            Some(&token("ADMIN", "admin-1")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, body) = send(&app, lemonsqueezy_order(&id, 77)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "acknowledged");
    assert_eq!(remaining(&app, departure.id).await, 10);
}

#[tokio::test]
async fn test_staff_routes_require_staff_token() {
    let (app, _) = setup(10).await;
    let uri = format!("/v1/staff/reservations/{}/cash", Uuid::new_v4());

    let (status, _) = send(&app, post_json(&uri, &json!({}), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, post_json(&uri, &json!({}), Some("not-a-jwt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, post_json(&uri, &json!({}), Some(&token("CUSTOMER", "c-1")))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, post_json(&uri, &json!({}), Some(&token("ADMIN", "admin-1")))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_booking_validation_errors() {
    let (app, departure) = setup(2).await;

    let (status, body) = send(
        &app,
        post_json(
            "/v1/reservations",
            &json!({ "departure_id": departure.id, "adult_count": 3, "customer": traveller() }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Insufficient capacity"));

    let (status, _) = send(
        &app,
        post_json(
            "/v1/reservations",
            &json!({ "departure_id": Uuid::new_v4(), "adult_count": 1, "customer": traveller() }),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        post_json(
            &format!("/v1/reservations/{}/checkout/cash", Uuid::new_v4()),
            &json!({}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_capture_answers_json_error_for_bad_bodies() {
    let (app, departure) = setup(10).await;
    let (_, created) = send(
        &app,
        post_json(
            "/v1/reservations",
            &json!({ "departure_id": departure.id, "adult_count": 1, "customer": traveller() }),
            None,
        ),
    )
    .await;
    let uri = format!("/v1/reservations/{}/paypal/capture", created["id"].as_str().unwrap());

    let (status, body) = send(&app, post_json(&uri, &json!({}), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(&app, post_json(&uri, &json!({ "orderID": "  " }), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let not_json = Request::builder()
        .method("POST")
        .uri(&uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("orderID=ORD-1"))
        .unwrap();
    let (status, body) = send(&app, not_json).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let no_content_type = Request::builder()
        .method("POST")
        .uri(&uri)
        .body(Body::from(r#"{"orderID":"ORD-1"}"#))
        .unwrap();
    let (status, body) = send(&app, no_content_type).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(&app, post_json(&uri, &json!({ "orderID": "../../v1/payments" }), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid PayPal order id"));

    let (_, reservation) = send(&app, get(&format!("/v1/reservations/{}", created["id"].as_str().unwrap()))).await;
    assert_eq!(reservation["status"], "pending");
}
