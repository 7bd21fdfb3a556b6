use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Emitted once per reservation, right after its payment is reconciled.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct TicketIssuedEvent {
    pub reservation_id: Uuid,
    pub ticket_code: String,
    pub departure_id: Uuid,
    pub tour_name: String,
    pub persons: u32,
    pub amount_cents: i64,
    pub currency: String,
    pub provider: String,
    pub recipient: Option<String>,
    pub timestamp: i64,
}

/// Receipt for an agency that settled a blocked reservation.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct AgencyPaymentReceivedEvent {
    pub reservation_id: Uuid,
    pub agency_code: String,
    pub recipient: Option<String>,
    pub timestamp: i64,
}

/// An agency let its payment window lapse.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct AgencyDeadlineLapsedEvent {
    pub reservation_id: Uuid,
    pub agency_code: String,
    pub amount_cents: i64,
    pub deadline: DateTime<Utc>,
    pub seats_released: bool,
    pub recipient: Option<String>,
    pub timestamp: i64,
}
