use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tortuga_catalog::Departure;
use uuid::Uuid;

use crate::payment::{Payment, PaymentProvider};
use crate::reservation::Reservation;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// A reservation and its departure, both exclusively locked, in that order.
#[derive(Debug, Clone)]
pub struct LockedBooking {
    pub reservation: Reservation,
    pub departure: Departure,
}

/// One atomic unit of work. Dropping it without `commit` rolls everything back.
///
/// Row locks are only taken through `lock_booking` (Reservation, then
/// Departure) and `lock_departure`. A transaction must not lock a departure and
/// afterwards a reservation.
#[async_trait]
pub trait BookingTx: Send {
    async fn lock_booking(&mut self, reservation_id: Uuid) -> Result<Option<LockedBooking>, StoreError>;

    async fn lock_departure(&mut self, departure_id: Uuid) -> Result<Option<Departure>, StoreError>;

    async fn payment_by_external_id(
        &mut self,
        reservation_id: Uuid,
        provider: PaymentProvider,
        external_id: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// Most recent `created`/`approved` attempt for this provider.
    async fn latest_open_payment(
        &mut self,
        reservation_id: Uuid,
        provider: PaymentProvider,
    ) -> Result<Option<Payment>, StoreError>;

    async fn payments_for_provider(
        &mut self,
        reservation_id: Uuid,
        provider: PaymentProvider,
    ) -> Result<Vec<Payment>, StoreError>;

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError>;

    async fn save_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError>;

    /// Persist `capacity_remaining` of a locked departure.
    async fn save_departure_capacity(&mut self, departure: &Departure) -> Result<(), StoreError>;

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    async fn save_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Persistence collaborator for bookings. Plain reads take no locks.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn BookingTx>, StoreError>;

    async fn get_departure(&self, departure_id: Uuid) -> Result<Option<Departure>, StoreError>;

    async fn get_reservation(&self, reservation_id: Uuid) -> Result<Option<Reservation>, StoreError>;

    async fn list_payments(&self, reservation_id: Uuid) -> Result<Vec<Payment>, StoreError>;

    /// Record a checkout attempt. Needs no lock: attempts never touch inventory.
    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    /// Ids of agency blocks whose payment deadline is before `now`.
    async fn lapsed_agency_blocks(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;
}
