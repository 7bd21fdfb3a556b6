use chrono::{DateTime, Utc};
use std::sync::Arc;
use tortuga_core::config::AgencyPolicy;
use tortuga_core::notify::TicketNotifier;
use tortuga_core::repository::{BookingStore, LockedBooking};
use tortuga_shared::models::events::AgencyDeadlineLapsedEvent;
use tracing::{error, info};
use uuid::Uuid;

use crate::reconciliation::ReconcileError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub lapsed: Vec<Uuid>,
    pub seats_released: u32,
    pub failed: usize,
}

/// Reverts agency blocks whose payment window has passed.
pub struct AgencyDeadlineSweeper {
    store: Arc<dyn BookingStore>,
    notifier: Arc<dyn TicketNotifier>,
    policy: AgencyPolicy,
}

impl AgencyDeadlineSweeper {
    pub fn new(store: Arc<dyn BookingStore>, notifier: Arc<dyn TicketNotifier>, policy: AgencyPolicy) -> Self {
        Self {
            store,
            notifier,
            policy,
        }
    }

    pub async fn expire_agency_blocks(&self, now: DateTime<Utc>) -> Result<SweepReport, ReconcileError> {
        let candidates = self.store.lapsed_agency_blocks(now).await?;
        let mut report = SweepReport::default();

        for reservation_id in candidates {
            match self.lapse_one(reservation_id, now).await {
                Ok(Some(released)) => {
                    report.lapsed.push(reservation_id);
                    report.seats_released += released;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(reservation_id = %reservation_id, "Failed to lapse agency block: {}", e);
                    report.failed += 1;
                }
            }
        }

        if !report.lapsed.is_empty() {
            info!(
                lapsed = report.lapsed.len(),
                seats_released = report.seats_released,
                "Agency deadline sweep finished"
            );
        }
        Ok(report)
    }

    /// `None` when the reservation was paid or cancelled since it was listed.
    async fn lapse_one(&self, reservation_id: Uuid, now: DateTime<Utc>) -> Result<Option<u32>, ReconcileError> {
        let mut tx = self.store.begin().await?;
        let Some(LockedBooking {
            mut reservation,
            mut departure,
        }) = tx.lock_booking(reservation_id).await?
        else {
            return Ok(None);
        };
        if !reservation.agency_deadline_passed(now) {
            return Ok(None);
        }

        let deadline = reservation.agency_payment_deadline.unwrap_or(now);
        reservation.lapse_agency_block()?;

        let mut released = 0;
        if self.policy.release_seats_on_lapse && reservation.seats_held {
            released = departure.release_seats(reservation.persons());
            reservation.seats_held = false;
            tx.save_departure_capacity(&departure).await?;
        }
        tx.save_reservation(&reservation).await?;
        tx.commit().await?;

        info!(
            reservation_id = %reservation_id,
            seats_released = released,
            "Agency block lapsed; reservation back to pending"
        );

        let event = AgencyDeadlineLapsedEvent {
            reservation_id,
            agency_code: reservation.agency_code.clone().unwrap_or_default(),
            amount_cents: reservation.amount_due_cents,
            deadline,
            seats_released: released > 0,
            recipient: Some(reservation.customer.email.expose().clone()).filter(|e| !e.is_empty()),
            timestamp: now.timestamp(),
        };
        if let Err(e) = self.notifier.agency_deadline_lapsed(&event).await {
            error!(reservation_id = %reservation_id, "Lapse notification failed: {}", e);
        }

        Ok(Some(released))
    }
}
