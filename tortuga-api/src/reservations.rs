use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tortuga_catalog::Departure;
use tortuga_core::payment::{Payment, PaymentProvider, PaymentStatus};
use tortuga_core::repository::BookingStore;
use tortuga_core::reservation::{ActorRole, CustomerInfo, Reservation, ReservationStatus};
use tortuga_order::NewReservation;
use tortuga_shared::{format_minor_units, Masked};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{Claims, Role};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub departure_id: Uuid,
    pub adult_count: u32,
    #[serde(default)]
    pub child_count: u32,
    pub customer: CustomerInfo,
    #[serde(default)]
    pub agency_code: Option<String>,
}

/// Reservation as exposed over HTTP. Customer contact data stays server-side.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReservationResponse {
    pub id: Uuid,
    pub departure_id: Uuid,
    pub status: ReservationStatus,
    pub adult_count: u32,
    pub child_count: u32,
    pub amount_due: String,
    pub currency: String,
    pub agency_code: Option<String>,
    pub agency_payment_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub payments: Vec<PaymentSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub id: Uuid,
    pub provider: PaymentProvider,
    pub status: PaymentStatus,
    pub amount: String,
    pub external_id: String,
    pub checkout_url: Option<String>,
}

impl From<&Payment> for PaymentSummary {
    fn from(p: &Payment) -> Self {
        Self {
            id: p.id,
            provider: p.provider,
            status: p.status,
            amount: format_minor_units(p.amount_cents),
            external_id: p.external_id.clone(),
            checkout_url: p.checkout_url.clone(),
        }
    }
}

impl ReservationResponse {
    pub fn new(reservation: &Reservation, payments: &[Payment], currency: String) -> Self {
        Self {
            id: reservation.id,
            departure_id: reservation.departure_id,
            status: reservation.status,
            adult_count: reservation.adult_count,
            child_count: reservation.child_count,
            amount_due: format_minor_units(reservation.amount_due_cents),
            currency,
            agency_code: reservation.agency_code.clone(),
            agency_payment_deadline: reservation.agency_payment_deadline,
            created_at: reservation.created_at,
            payments: payments.iter().map(PaymentSummary::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DepartureResponse {
    pub id: Uuid,
    pub tour_id: Uuid,
    pub tour_name: String,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub capacity_max: u32,
    pub capacity_remaining: u32,
    pub utilization: f64,
    pub adult_price: String,
    pub child_price: String,
}

impl From<Departure> for DepartureResponse {
    fn from(d: Departure) -> Self {
        Self {
            utilization: d.utilization(),
            adult_price: format_minor_units(d.pricing.adult_price_cents),
            child_price: format_minor_units(d.pricing.child_price_cents),
            id: d.id,
            tour_id: d.tour_id,
            tour_name: d.tour_name,
            date: d.date,
            time: d.time,
            capacity_max: d.capacity_max,
            capacity_remaining: d.capacity_remaining,
        }
    }
}

/// Map the caller's token to a creation path. Agencies answer for their
/// customers, so their own identity fills gaps in the traveller record.
fn booking_actor(claims: Option<&Claims>, customer: &mut CustomerInfo) -> Result<(ActorRole, Option<String>), AppError> {
    let Some(claims) = claims else {
        return Ok((ActorRole::SelfService, None));
    };
    let role = claims
        .role()
        .ok_or_else(|| AppError::AuthorizationError(format!("unknown role {}", claims.role)))?;

    let actor = match role {
        Role::Customer => ActorRole::SelfService,
        Role::Agency => {
            if customer.name.trim().is_empty() {
                customer.name = claims.sub.clone();
            }
            if customer.email.expose().trim().is_empty() {
                if let Some(email) = &claims.email {
                    customer.email = Masked(email.clone());
                }
            }
            ActorRole::Agency
        }
        Role::Secretary | Role::Admin => ActorRole::Staff,
    };
    Ok((actor, Some(claims.sub.clone())))
}

/// POST /v1/reservations
pub async fn create_reservation(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Json(payload): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), AppError> {
    let mut customer = payload.customer;
    let (actor_role, created_by) = booking_actor(claims.as_deref(), &mut customer)?;

    let reservation = state
        .reservations
        .create(
            NewReservation {
                departure_id: payload.departure_id,
                adult_count: payload.adult_count,
                child_count: payload.child_count,
                customer,
                actor_role,
                created_by,
                agency_code: payload.agency_code,
            },
            Utc::now(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ReservationResponse::new(&reservation, &[], state.payments.currency())),
    ))
}

/// GET /v1/reservations/{id}
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationResponse>, AppError> {
    let reservation = state
        .store
        .get_reservation(id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("Reservation not found: {id}")))?;
    let payments = state.store.list_payments(id).await?;

    Ok(Json(ReservationResponse::new(&reservation, &payments, state.payments.currency())))
}

/// GET /v1/departures/{id}
pub async fn get_departure(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DepartureResponse>, AppError> {
    let departure = state
        .store
        .get_departure(id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("Departure not found: {id}")))?;
    Ok(Json(departure.into()))
}
