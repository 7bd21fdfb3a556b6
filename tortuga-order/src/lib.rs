pub mod booking;
pub mod checkout;
pub mod expiry;
pub mod orchestrator;
pub mod providers;
pub mod reconciliation;
pub mod ticket;

#[cfg(test)]
pub(crate) mod test_support;

pub use booking::{BookingError, NewReservation, ReservationService};
pub use checkout::{CheckoutError, CheckoutService};
pub use expiry::{AgencyDeadlineSweeper, SweepReport};
pub use orchestrator::{CaptureError, PaymentOrchestrator, WebhookError, WebhookOutcome};
pub use providers::{LemonSqueezyAdapter, PayPalAdapter};
pub use reconciliation::{ConfirmOutcome, ReconcileError, ReconciliationEngine};
