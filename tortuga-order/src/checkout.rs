use std::sync::Arc;
use tortuga_core::payment::{Payment, PaymentAdapter, ProviderError};
use tortuga_core::repository::{BookingStore, StoreError};
use tortuga_core::reservation::ReservationStatus;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("Reservation not found: {0}")]
    NotFound(Uuid),

    #[error("Reservation {id} cannot be paid in status {status}")]
    NotPayable { id: Uuid, status: ReservationStatus },

    #[error("Payment provider {0} is not enabled")]
    ProviderDisabled(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Opens provider checkouts and records each as a `created` payment attempt.
pub struct CheckoutService {
    store: Arc<dyn BookingStore>,
    currency: String,
}

impl CheckoutService {
    pub fn new(store: Arc<dyn BookingStore>, currency: impl Into<String>) -> Self {
        Self {
            store,
            currency: currency.into(),
        }
    }

    pub async fn start(&self, adapter: &dyn PaymentAdapter, reservation_id: Uuid) -> Result<Payment, CheckoutError> {
        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(CheckoutError::NotFound(reservation_id))?;
        if !reservation.is_payable() {
            return Err(CheckoutError::NotPayable {
                id: reservation.id,
                status: reservation.status,
            });
        }

        let checkout = adapter.create_checkout(&reservation).await?;
        let payment = Payment::from_checkout(&reservation, adapter.provider(), &self.currency, checkout);
        self.store.insert_payment(&payment).await?;

        info!(
            reservation_id = %reservation.id,
            provider = %payment.provider,
            external_id = %payment.external_id,
            "Checkout started"
        );
        Ok(payment)
    }
}
