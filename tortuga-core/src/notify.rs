use async_trait::async_trait;
use tortuga_shared::models::events::{
    AgencyDeadlineLapsedEvent, AgencyPaymentReceivedEvent, TicketIssuedEvent,
};
use tracing::info;

#[derive(Debug, thiserror::Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Outbound customer/agency notifications. Callers treat every method as
/// best-effort: an error is logged, never propagated into a booking outcome.
#[async_trait]
pub trait TicketNotifier: Send + Sync {
    async fn ticket_issued(&self, event: &TicketIssuedEvent) -> Result<(), NotifyError>;

    async fn agency_payment_received(&self, event: &AgencyPaymentReceivedEvent) -> Result<(), NotifyError>;

    async fn agency_deadline_lapsed(&self, event: &AgencyDeadlineLapsedEvent) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Used when no broker is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl TicketNotifier for LogNotifier {
    async fn ticket_issued(&self, event: &TicketIssuedEvent) -> Result<(), NotifyError> {
        info!(
            reservation_id = %event.reservation_id,
            ticket_code = %event.ticket_code,
            "Ticket issued"
        );
        Ok(())
    }

    async fn agency_payment_received(&self, event: &AgencyPaymentReceivedEvent) -> Result<(), NotifyError> {
        info!(
            reservation_id = %event.reservation_id,
            agency_code = %event.agency_code,
            "Agency payment received"
        );
        Ok(())
    }

    async fn agency_deadline_lapsed(&self, event: &AgencyDeadlineLapsedEvent) -> Result<(), NotifyError> {
        info!(
            reservation_id = %event.reservation_id,
            agency_code = %event.agency_code,
            seats_released = event.seats_released,
            "Agency payment deadline lapsed"
        );
        Ok(())
    }
}
