//! Applies verified payment confirmations to reservations and inventory.
//!
//! Every mutation for one confirmation happens in a single store transaction
//! that holds the reservation lock and then the departure lock. Duplicate
//! deliveries find the reservation already `paid` and change nothing but
//! bookkeeping, so the engine can be invoked any number of times per payment.

use chrono::Utc;
use std::sync::Arc;
use tortuga_catalog::{Departure, InventoryError};
use tortuga_core::notify::TicketNotifier;
use tortuga_core::payment::{Payment, PaymentEvidence, PaymentProvider, PaymentStatus};
use tortuga_core::repository::{BookingStore, BookingTx, LockedBooking, StoreError};
use tortuga_core::reservation::{Reservation, ReservationError, ReservationStatus};
use tortuga_shared::models::events::{AgencyPaymentReceivedEvent, TicketIssuedEvent};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ticket::ticket_code;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Reservation not found: {0}")]
    NotFound(Uuid),

    #[error("Reservation {0} is cancelled")]
    Cancelled(Uuid),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Transition(#[from] ReservationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Infrastructure failures may succeed on redelivery; business conflicts
    /// never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::Store(_))
    }
}

#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    pub reservation: Reservation,
    /// False when the reservation was already paid (duplicate delivery).
    pub newly_paid: bool,
    pub ticket_code: Option<String>,
}

pub struct ReconciliationEngine {
    store: Arc<dyn BookingStore>,
    notifier: Arc<dyn TicketNotifier>,
    currency: String,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn BookingStore>, notifier: Arc<dyn TicketNotifier>, currency: impl Into<String>) -> Self {
        Self {
            store,
            notifier,
            currency: currency.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn BookingStore> {
        &self.store
    }

    /// Mark the reservation paid on the strength of `evidence`.
    pub async fn confirm_payment(
        &self,
        reservation_id: Uuid,
        evidence: PaymentEvidence,
    ) -> Result<ConfirmOutcome, ReconcileError> {
        let mut tx = self.store.begin().await?;
        let LockedBooking {
            mut reservation,
            mut departure,
        } = tx
            .lock_booking(reservation_id)
            .await?
            .ok_or(ReconcileError::NotFound(reservation_id))?;

        let provider = evidence.provider();
        let matched = find_payment(tx.as_mut(), reservation_id, provider, evidence.external_id()).await?;

        match reservation.status {
            ReservationStatus::Paid => {
                self.refresh_duplicate(tx, &mut reservation, matched, &evidence)
                    .await?;
                info!(
                    reservation_id = %reservation_id,
                    provider = %provider,
                    "Duplicate payment confirmation; reservation already paid"
                );
                return Ok(ConfirmOutcome {
                    reservation,
                    newly_paid: false,
                    ticket_code: None,
                });
            }
            ReservationStatus::Cancelled => {
                warn!(reservation_id = %reservation_id, provider = %provider, "Payment received for cancelled reservation");
                return Err(ReconcileError::Cancelled(reservation_id));
            }
            ReservationStatus::Pending | ReservationStatus::AgencyBlocked => {}
        }

        if !reservation.seats_held {
            departure.take_seats(reservation.persons())?;
            tx.save_departure_capacity(&departure).await?;
        }

        let previous = reservation.mark_paid()?;
        reservation.seats_held = true;
        if let Some(email) = evidence.customer_email() {
            reservation.update_customer_email(email);
        }
        tx.save_reservation(&reservation).await?;

        match matched {
            Some(mut payment) => {
                payment.mark_paid(&evidence);
                payment.amount_cents = reservation.amount_due_cents;
                payment.currency = self.currency.clone();
                tx.save_payment(&payment).await?;
            }
            None => {
                let payment = Payment::settled(&reservation, &evidence, &self.currency);
                tx.insert_payment(&payment).await?;
            }
        }

        tx.commit().await?;
        info!(
            reservation_id = %reservation_id,
            provider = %provider,
            previous_status = %previous,
            capacity_remaining = departure.capacity_remaining,
            "Reservation paid"
        );

        let code = ticket_code(&reservation, Utc::now());
        self.notify_paid(&reservation, &departure, previous, provider, &code)
            .await;

        Ok(ConfirmOutcome {
            reservation,
            newly_paid: true,
            ticket_code: Some(code),
        })
    }

    async fn refresh_duplicate(
        &self,
        mut tx: Box<dyn BookingTx>,
        reservation: &mut Reservation,
        matched: Option<Payment>,
        evidence: &PaymentEvidence,
    ) -> Result<(), ReconcileError> {
        if let Some(email) = evidence.customer_email() {
            if reservation.update_customer_email(email) {
                tx.save_reservation(reservation).await?;
            }
        }
        if let Some(mut payment) = matched {
            match payment.status {
                PaymentStatus::Created | PaymentStatus::Approved => {
                    payment.mark_paid(evidence);
                    tx.save_payment(&payment).await?;
                }
                PaymentStatus::Paid if evidence.external_id().is_some() => {
                    payment.raw_payload = evidence.raw_payload();
                    payment.updated_at = Utc::now();
                    tx.save_payment(&payment).await?;
                }
                _ => {}
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn notify_paid(
        &self,
        reservation: &Reservation,
        departure: &Departure,
        previous: ReservationStatus,
        provider: PaymentProvider,
        code: &str,
    ) {
        let recipient = Some(reservation.customer.email.expose().clone()).filter(|e| !e.is_empty());
        let timestamp = Utc::now().timestamp();

        let ticket = TicketIssuedEvent {
            reservation_id: reservation.id,
            ticket_code: code.to_string(),
            departure_id: departure.id,
            tour_name: departure.tour_name.clone(),
            persons: reservation.persons(),
            amount_cents: reservation.amount_due_cents,
            currency: self.currency.clone(),
            provider: provider.to_string(),
            recipient: recipient.clone(),
            timestamp,
        };
        if let Err(e) = self.notifier.ticket_issued(&ticket).await {
            error!(reservation_id = %reservation.id, "Ticket notification failed: {}", e);
        }

        if previous == ReservationStatus::AgencyBlocked {
            let receipt = AgencyPaymentReceivedEvent {
                reservation_id: reservation.id,
                agency_code: reservation.agency_code.clone().unwrap_or_default(),
                recipient,
                timestamp,
            };
            if let Err(e) = self.notifier.agency_payment_received(&receipt).await {
                error!(reservation_id = %reservation.id, "Agency receipt notification failed: {}", e);
            }
        }
    }

    /// Mark the provider's payment rows for this reservation failed. The
    /// reservation and its seats are left as they are. Returns how many rows
    /// changed.
    pub async fn mark_refunded(
        &self,
        reservation_id: Uuid,
        provider: PaymentProvider,
        external_id: Option<&str>,
        raw: serde_json::Value,
    ) -> Result<usize, ReconcileError> {
        let mut tx = self.store.begin().await?;
        if tx.lock_booking(reservation_id).await?.is_none() {
            return Err(ReconcileError::NotFound(reservation_id));
        }

        let exact = match external_id {
            Some(id) => tx.payment_by_external_id(reservation_id, provider, id).await?,
            None => None,
        };
        let targets = match exact {
            Some(payment) => vec![payment],
            None => tx.payments_for_provider(reservation_id, provider).await?,
        };

        let mut changed = 0;
        for mut payment in targets {
            if payment.status == PaymentStatus::Failed {
                continue;
            }
            payment.mark_failed(raw.clone());
            tx.save_payment(&payment).await?;
            changed += 1;
        }
        tx.commit().await?;

        info!(reservation_id = %reservation_id, provider = %provider, payments = changed, "Refund recorded");
        Ok(changed)
    }

    /// Cancel a `pending` or `agency_blocked` reservation, returning held
    /// seats to the departure and closing open payment attempts.
    pub async fn cancel_reservation(&self, reservation_id: Uuid) -> Result<Reservation, ReconcileError> {
        let mut tx = self.store.begin().await?;
        let LockedBooking {
            mut reservation,
            mut departure,
        } = tx
            .lock_booking(reservation_id)
            .await?
            .ok_or(ReconcileError::NotFound(reservation_id))?;

        let previous = reservation.cancel()?;
        let mut released = 0;
        if reservation.seats_held {
            released = departure.release_seats(reservation.persons());
            reservation.seats_held = false;
            tx.save_departure_capacity(&departure).await?;
        }
        tx.save_reservation(&reservation).await?;

        for provider in [PaymentProvider::LemonSqueezy, PaymentProvider::PayPal, PaymentProvider::Cash] {
            for mut payment in tx.payments_for_provider(reservation_id, provider).await? {
                if payment.is_open() {
                    payment.mark_cancelled();
                    tx.save_payment(&payment).await?;
                }
            }
        }
        tx.commit().await?;

        info!(
            reservation_id = %reservation_id,
            previous_status = %previous,
            seats_released = released,
            "Reservation cancelled"
        );
        Ok(reservation)
    }
}

async fn find_payment(
    tx: &mut dyn BookingTx,
    reservation_id: Uuid,
    provider: PaymentProvider,
    external_id: Option<&str>,
) -> Result<Option<Payment>, StoreError> {
    if let Some(external_id) = external_id {
        if let Some(payment) = tx
            .payment_by_external_id(reservation_id, provider, external_id)
            .await?
        {
            return Ok(Some(payment));
        }
    }
    tx.latest_open_payment(reservation_id, provider).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{customer, pending_reservation, store_with_departure, RecordingNotifier};
    use chrono::Duration;
    use tortuga_core::payment::Checkout;
    use tortuga_store::MemoryBookingStore;

    fn engine(store: Arc<MemoryBookingStore>, notifier: Arc<RecordingNotifier>) -> ReconciliationEngine {
        ReconciliationEngine::new(store, notifier, "USD")
    }

    fn ls_order(order_id: &str) -> PaymentEvidence {
        PaymentEvidence::LemonSqueezyOrder {
            order_id: order_id.into(),
            customer_email: Some("Buyer@Mail.com".into()),
            raw: serde_json::json!({"data": {"id": order_id}}),
        }
    }

    async fn open_checkout(store: &MemoryBookingStore, reservation: &Reservation, external_id: &str) -> Payment {
        let payment = Payment::from_checkout(
            reservation,
            PaymentProvider::LemonSqueezy,
            "USD",
            Checkout {
                external_id: external_id.into(),
                redirect_url: None,
                raw: serde_json::json!({}),
            },
        );
        store.insert_payment(&payment).await.unwrap();
        payment
    }

    async fn agency_block(store: &MemoryBookingStore, departure: &Departure, persons: u32, deadline_days: i64) -> Reservation {
        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_departure(departure.id).await.unwrap().unwrap();
        locked.take_seats(persons).unwrap();
        let reservation = Reservation::new_agency_block(
            departure.id,
            persons,
            0,
            departure.pricing.quote(persons, 0).unwrap(),
            customer(),
            "VCH-889".into(),
            Utc::now() + Duration::days(deadline_days),
            Some("agency-7".into()),
        );
        tx.insert_reservation(&reservation).await.unwrap();
        tx.save_departure_capacity(&locked).await.unwrap();
        tx.commit().await.unwrap();
        reservation
    }

    async fn remaining(store: &MemoryBookingStore, departure: &Departure) -> u32 {
        store.get_departure(departure.id).await.unwrap().unwrap().capacity_remaining
    }

    #[tokio::test]
    async fn test_pending_then_duplicate_webhook() {
        let (store, dep) = store_with_departure(10).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine(store.clone(), notifier.clone());
        let reservation = pending_reservation(&store, &dep, 3).await;
        open_checkout(&store, &reservation, "chk_1").await;

        let first = engine.confirm_payment(reservation.id, ls_order("4411")).await.unwrap();
        assert!(first.newly_paid);
        assert!(first.ticket_code.unwrap().starts_with("TKT-"));
        assert_eq!(first.reservation.status, ReservationStatus::Paid);
        assert_eq!(first.reservation.customer.email.expose(), "buyer@mail.com");
        assert_eq!(remaining(&store, &dep).await, 7);

        let second = engine.confirm_payment(reservation.id, ls_order("4411")).await.unwrap();
        assert!(!second.newly_paid);
        assert_eq!(remaining(&store, &dep).await, 7);

        let payments = store.list_payments(reservation.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Paid);
        assert_eq!(payments[0].external_id, "4411");
        assert_eq!(payments[0].amount_cents, reservation.amount_due_cents);
        assert_eq!(notifier.kinds(), vec!["ticket_issued"]);
    }

    #[tokio::test]
    async fn test_agency_block_paid_without_second_decrement() {
        let (store, dep) = store_with_departure(10).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine(store.clone(), notifier.clone());
        let reservation = agency_block(&store, &dep, 5, 15).await;
        assert_eq!(remaining(&store, &dep).await, 5);

        let cash = PaymentEvidence::Cash {
            collected_by: "secretary-1".into(),
        };
        let outcome = engine.confirm_payment(reservation.id, cash).await.unwrap();

        assert!(outcome.newly_paid);
        assert_eq!(outcome.reservation.status, ReservationStatus::Paid);
        assert_eq!(remaining(&store, &dep).await, 5);

        let payments = store.list_payments(reservation.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].provider, PaymentProvider::Cash);
        assert_eq!(payments[0].external_id, "");
        assert_eq!(payments[0].raw_payload["user"], "secretary-1");
        assert_eq!(notifier.kinds(), vec!["ticket_issued", "agency_payment_received"]);
    }

    #[tokio::test]
    async fn test_capacity_exhausted_at_confirmation() {
        let (store, dep) = store_with_departure(3).await;
        let engine = engine(store.clone(), Arc::new(RecordingNotifier::default()));
        let first = pending_reservation(&store, &dep, 2).await;
        let second = pending_reservation(&store, &dep, 2).await;

        engine.confirm_payment(first.id, ls_order("A")).await.unwrap();
        let err = engine.confirm_payment(second.id, ls_order("B")).await.unwrap_err();

        assert!(matches!(err, ReconcileError::Inventory(InventoryError::InsufficientCapacity { .. })));
        assert!(!err.is_retryable());
        assert_eq!(remaining(&store, &dep).await, 1);
        let second = store.get_reservation(second.id).await.unwrap().unwrap();
        assert_eq!(second.status, ReservationStatus::Pending);
        assert!(store.list_payments(second.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_reservation_is_terminal() {
        let (store, dep) = store_with_departure(10).await;
        let engine = engine(store.clone(), Arc::new(RecordingNotifier::default()));
        let reservation = pending_reservation(&store, &dep, 2).await;
        engine.cancel_reservation(reservation.id).await.unwrap();

        let err = engine.confirm_payment(reservation.id, ls_order("X")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Cancelled(_)));
        assert!(!err.is_retryable());
        assert_eq!(remaining(&store, &dep).await, 10);
        let stored = store.get_reservation(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_deliveries_decrement_once() {
        let (store, dep) = store_with_departure(10).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Arc::new(engine(store.clone(), notifier.clone()));
        let reservation = pending_reservation(&store, &dep, 4).await;

        let (a, b) = tokio::join!(
            engine.confirm_payment(reservation.id, ls_order("4411")),
            engine.confirm_payment(reservation.id, ls_order("4411")),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.newly_paid ^ b.newly_paid);
        assert_eq!(remaining(&store, &dep).await, 6);
        assert_eq!(store.list_payments(reservation.id).await.unwrap().len(), 1);
        assert_eq!(notifier.kinds().len(), 1);
    }

    #[tokio::test]
    async fn test_racing_confirmations_for_last_seats() {
        let (store, dep) = store_with_departure(2).await;
        let engine = Arc::new(engine(store.clone(), Arc::new(RecordingNotifier::default())));
        let first = pending_reservation(&store, &dep, 2).await;
        let second = pending_reservation(&store, &dep, 2).await;

        let (a, b) = tokio::join!(
            engine.confirm_payment(first.id, ls_order("race-a")),
            engine.confirm_payment(second.id, ls_order("race-b")),
        );

        let (winner, loser, err) = match (a, b) {
            (Ok(_), Err(e)) => (first.id, second.id, e),
            (Err(e), Ok(_)) => (second.id, first.id, e),
            (a, b) => panic!("expected exactly one confirmation to succeed: {a:?} / {b:?}"),
        };
        assert!(matches!(err, ReconcileError::Inventory(InventoryError::InsufficientCapacity { .. })));
        assert_eq!(remaining(&store, &dep).await, 0);

        let paid = store.get_reservation(winner).await.unwrap().unwrap();
        assert_eq!(paid.status, ReservationStatus::Paid);
        assert_eq!(store.list_payments(winner).await.unwrap().len(), 1);

        let unpaid = store.get_reservation(loser).await.unwrap().unwrap();
        assert_eq!(unpaid.status, ReservationStatus::Pending);
        assert!(!unpaid.seats_held);
        assert!(store.list_payments(loser).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_confirmations_never_oversell() {
        let (store, dep) = store_with_departure(5).await;
        let engine = Arc::new(engine(store.clone(), Arc::new(RecordingNotifier::default())));
        let mut reservations = Vec::new();
        for _ in 0..4 {
            reservations.push(pending_reservation(&store, &dep, 2).await);
        }

        let mut handles = Vec::new();
        for (i, reservation) in reservations.iter().enumerate() {
            let engine = engine.clone();
            let id = reservation.id;
            handles.push(tokio::spawn(async move {
                engine.confirm_payment(id, ls_order(&format!("o-{i}"))).await
            }));
        }

        let mut paid = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                paid += 1;
            }
        }
        assert_eq!(paid, 2);
        assert_eq!(remaining(&store, &dep).await, 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_retryable_and_rolls_back() {
        let (store, dep) = store_with_departure(10).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine(store.clone(), notifier.clone());
        let reservation = pending_reservation(&store, &dep, 2).await;

        store.fail_next_commit();
        let err = engine.confirm_payment(reservation.id, ls_order("1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(remaining(&store, &dep).await, 10);
        assert!(notifier.kinds().is_empty());

        let retry = engine.confirm_payment(reservation.id, ls_order("1")).await.unwrap();
        assert!(retry.newly_paid);
        assert_eq!(remaining(&store, &dep).await, 8);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_affect_outcome() {
        let (store, dep) = store_with_departure(10).await;
        let engine = engine(store.clone(), Arc::new(RecordingNotifier::failing()));
        let reservation = pending_reservation(&store, &dep, 1).await;

        let outcome = engine.confirm_payment(reservation.id, ls_order("1")).await.unwrap();
        assert!(outcome.newly_paid);
        let stored = store.get_reservation(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Paid);
    }

    #[tokio::test]
    async fn test_lapsed_block_with_kept_seats_pays_without_decrement() {
        let (store, dep) = store_with_departure(10).await;
        let engine = engine(store.clone(), Arc::new(RecordingNotifier::default()));
        let mut reservation = agency_block(&store, &dep, 4, -1).await;

        reservation.lapse_agency_block().unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.save_reservation(&reservation).await.unwrap();
        tx.commit().await.unwrap();

        let outcome = engine.confirm_payment(reservation.id, ls_order("9")).await.unwrap();
        assert!(outcome.newly_paid);
        assert_eq!(remaining(&store, &dep).await, 6);
    }

    #[tokio::test]
    async fn test_refund_marks_payments_failed_only() {
        let (store, dep) = store_with_departure(10).await;
        let engine = engine(store.clone(), Arc::new(RecordingNotifier::default()));
        let reservation = pending_reservation(&store, &dep, 2).await;
        open_checkout(&store, &reservation, "chk_old").await;
        engine.confirm_payment(reservation.id, ls_order("4411")).await.unwrap();

        let changed = engine
            .mark_refunded(reservation.id, PaymentProvider::LemonSqueezy, Some("4411"), serde_json::json!({"refund": true}))
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let payments = store.list_payments(reservation.id).await.unwrap();
        assert!(payments.iter().all(|p| p.status == PaymentStatus::Failed));
        let stored = store.get_reservation(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Paid);
        assert_eq!(remaining(&store, &dep).await, 8);
    }

    #[tokio::test]
    async fn test_cancel_releases_held_seats_and_closes_attempts() {
        let (store, dep) = store_with_departure(10).await;
        let engine = engine(store.clone(), Arc::new(RecordingNotifier::default()));
        let blocked = agency_block(&store, &dep, 6, 15).await;
        open_checkout(&store, &blocked, "chk_9").await;
        assert_eq!(remaining(&store, &dep).await, 4);

        let cancelled = engine.cancel_reservation(blocked.id).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert!(!cancelled.seats_held);
        assert_eq!(remaining(&store, &dep).await, 10);
        let payments = store.list_payments(blocked.id).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Cancelled);

        let paid = pending_reservation(&store, &dep, 1).await;
        engine.confirm_payment(paid.id, ls_order("p")).await.unwrap();
        assert!(matches!(
            engine.cancel_reservation(paid.id).await,
            Err(ReconcileError::Transition(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_reservation() {
        let (store, _dep) = store_with_departure(10).await;
        let engine = engine(store, Arc::new(RecordingNotifier::default()));
        let err = engine.confirm_payment(Uuid::new_v4(), ls_order("1")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::NotFound(_)));
        assert!(!err.is_retryable());
    }
}
