//! In-process booking store.
//!
//! One mutex guards the whole state, so a transaction holding it serializes
//! every other writer and reader. Writes go to a working copy that replaces
//! the shared state only on commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tortuga_catalog::Departure;
use tortuga_core::payment::{Payment, PaymentProvider};
use tortuga_core::repository::{BookingStore, BookingTx, LockedBooking, StoreError};
use tortuga_core::reservation::{Reservation, ReservationStatus};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    departures: HashMap<Uuid, Departure>,
    reservations: HashMap<Uuid, Reservation>,
    payments: Vec<Payment>,
}

#[derive(Clone, Default)]
pub struct MemoryBookingStore {
    state: Arc<Mutex<MemoryState>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_departure(&self, departure: Departure) {
        self.state.lock().await.departures.insert(departure.id, departure);
    }

    pub async fn add_reservation(&self, reservation: Reservation) {
        self.state
            .lock()
            .await
            .reservations
            .insert(reservation.id, reservation);
    }

    /// Make the next commit fail with a database error (and roll back).
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

pub struct MemoryBookingTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_commit: Arc<AtomicBool>,
}

impl MemoryBookingTx {
    fn payments_of(&self, reservation_id: Uuid, provider: PaymentProvider) -> impl Iterator<Item = &Payment> {
        self.working
            .payments
            .iter()
            .filter(move |p| p.reservation_id == reservation_id && p.provider == provider)
    }
}

#[async_trait]
impl BookingTx for MemoryBookingTx {
    async fn lock_booking(&mut self, reservation_id: Uuid) -> Result<Option<LockedBooking>, StoreError> {
        let Some(reservation) = self.working.reservations.get(&reservation_id).cloned() else {
            return Ok(None);
        };
        let departure = self
            .working
            .departures
            .get(&reservation.departure_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "reservation {} references missing departure {}",
                    reservation.id, reservation.departure_id
                ))
            })?;
        Ok(Some(LockedBooking {
            reservation,
            departure,
        }))
    }

    async fn lock_departure(&mut self, departure_id: Uuid) -> Result<Option<Departure>, StoreError> {
        Ok(self.working.departures.get(&departure_id).cloned())
    }

    async fn payment_by_external_id(
        &mut self,
        reservation_id: Uuid,
        provider: PaymentProvider,
        external_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .payments_of(reservation_id, provider)
            .filter(|p| p.external_id == external_id)
            .last()
            .cloned())
    }

    async fn latest_open_payment(
        &mut self,
        reservation_id: Uuid,
        provider: PaymentProvider,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .payments_of(reservation_id, provider)
            .filter(|p| p.is_open())
            .last()
            .cloned())
    }

    async fn payments_for_provider(
        &mut self,
        reservation_id: Uuid,
        provider: PaymentProvider,
    ) -> Result<Vec<Payment>, StoreError> {
        Ok(self.payments_of(reservation_id, provider).cloned().collect())
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        if self.working.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Database(format!(
                "duplicate reservation id {}",
                reservation.id
            )));
        }
        self.working
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn save_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        match self.working.reservations.get_mut(&reservation.id) {
            Some(stored) => {
                *stored = reservation.clone();
                Ok(())
            }
            None => Err(StoreError::Database(format!(
                "reservation {} does not exist",
                reservation.id
            ))),
        }
    }

    async fn save_departure_capacity(&mut self, departure: &Departure) -> Result<(), StoreError> {
        let stored = self
            .working
            .departures
            .get_mut(&departure.id)
            .ok_or_else(|| StoreError::Database(format!("departure {} does not exist", departure.id)))?;
        if departure.capacity_remaining > stored.capacity_max {
            return Err(StoreError::Database(format!(
                "capacity_remaining {} exceeds capacity_max {}",
                departure.capacity_remaining, stored.capacity_max
            )));
        }
        stored.capacity_remaining = departure.capacity_remaining;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.working.payments.push(payment.clone());
        Ok(())
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        match self.working.payments.iter_mut().find(|p| p.id == payment.id) {
            Some(stored) => {
                *stored = payment.clone();
                Ok(())
            }
            None => Err(StoreError::Database(format!("payment {} does not exist", payment.id))),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryBookingTx {
            mut guard,
            working,
            fail_commit,
        } = *self;
        if fail_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected commit failure".into()));
        }
        *guard = working;
        Ok(())
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn begin(&self) -> Result<Box<dyn BookingTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryBookingTx {
            guard,
            working,
            fail_commit: self.fail_next_commit.clone(),
        }))
    }

    async fn get_departure(&self, departure_id: Uuid) -> Result<Option<Departure>, StoreError> {
        Ok(self.state.lock().await.departures.get(&departure_id).cloned())
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> Result<Option<Reservation>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .reservations
            .get(&reservation_id)
            .cloned())
    }

    async fn list_payments(&self, reservation_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .payments
            .iter()
            .filter(|p| p.reservation_id == reservation_id)
            .cloned()
            .collect())
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        self.state.lock().await.payments.push(payment.clone());
        Ok(())
    }

    async fn lapsed_agency_blocks(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.lock().await;
        let mut lapsed: Vec<&Reservation> = state
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::AgencyBlocked && r.agency_deadline_passed(now))
            .collect();
        lapsed.sort_by_key(|r| r.agency_payment_deadline);
        Ok(lapsed.into_iter().map(|r| r.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tortuga_catalog::{Tour, TourPricing};
    use tortuga_core::reservation::{ActorRole, CustomerInfo};

    fn departure(capacity: u32) -> Departure {
        let tour = Tour::new("Isla de la Plata", TourPricing::new(4500, 2500));
        Departure::new(&tour, NaiveDate::from_ymd_opt(2030, 3, 1).unwrap(), None, capacity)
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryBookingStore::new();
        let dep = departure(10);
        store.add_departure(dep.clone()).await;

        {
            let mut tx = store.begin().await.unwrap();
            let mut locked = tx.lock_departure(dep.id).await.unwrap().unwrap();
            locked.take_seats(4).unwrap();
            tx.save_departure_capacity(&locked).await.unwrap();
        }

        let stored = store.get_departure(dep.id).await.unwrap().unwrap();
        assert_eq!(stored.capacity_remaining, 10);
    }

    #[tokio::test]
    async fn test_commit_publishes_and_injected_failure_discards() {
        let store = MemoryBookingStore::new();
        let dep = departure(10);
        store.add_departure(dep.clone()).await;

        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_departure(dep.id).await.unwrap().unwrap();
        locked.take_seats(3).unwrap();
        tx.save_departure_capacity(&locked).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.get_departure(dep.id).await.unwrap().unwrap().capacity_remaining, 7);

        store.fail_next_commit();
        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_departure(dep.id).await.unwrap().unwrap();
        locked.take_seats(7).unwrap();
        tx.save_departure_capacity(&locked).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(store.get_departure(dep.id).await.unwrap().unwrap().capacity_remaining, 7);
    }

    #[tokio::test]
    async fn test_lapsed_agency_blocks_sorted_by_deadline() {
        let store = MemoryBookingStore::new();
        let dep = departure(20);
        store.add_departure(dep.clone()).await;
        let now = Utc::now();

        let block = |days: i64| {
            Reservation::new_agency_block(
                dep.id,
                2,
                0,
                9000,
                CustomerInfo {
                    name: "Grupo".into(),
                    ..Default::default()
                },
                "AG-1".into(),
                now + chrono::Duration::days(days),
                None,
            )
        };
        let late = block(-1);
        let later = block(-3);
        let future = block(5);
        let pending = Reservation::new_pending(
            dep.id,
            1,
            0,
            4500,
            CustomerInfo::default(),
            ActorRole::SelfService,
            None,
        );
        for r in [late.clone(), later.clone(), future, pending] {
            store.add_reservation(r).await;
        }

        let lapsed = store.lapsed_agency_blocks(now).await.unwrap();
        assert_eq!(lapsed, vec![later.id, late.id]);
    }
}
