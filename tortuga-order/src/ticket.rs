use chrono::{DateTime, Utc};
use tortuga_core::reservation::Reservation;

/// Ticket code printed on the voucher: `TKT-{short id}-{YYYYMMDDHHMMSS}`.
pub fn ticket_code(reservation: &Reservation, issued_at: DateTime<Utc>) -> String {
    format!(
        "TKT-{}-{}",
        reservation.short_id(),
        issued_at.format("%Y%m%d%H%M%S")
    )
}
