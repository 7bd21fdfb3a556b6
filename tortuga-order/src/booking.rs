use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tortuga_catalog::{InventoryError, PricingError};
use tortuga_core::config::AgencyPolicy;
use tortuga_core::repository::{BookingStore, StoreError};
use tortuga_core::reservation::{ActorRole, CustomerInfo, Reservation};
use tortuga_core::CoreError;
use tracing::info;
use uuid::Uuid;

/// A request to book seats on a departure.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub departure_id: Uuid,
    pub adult_count: u32,
    pub child_count: u32,
    pub customer: CustomerInfo,
    pub actor_role: ActorRole,
    pub created_by: Option<String>,
    pub agency_code: Option<String>,
}

impl NewReservation {
    pub fn persons(&self) -> u32 {
        self.adult_count.saturating_add(self.child_count)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Departure not found: {0}")]
    DepartureNotFound(Uuid),

    #[error("Departure {0} has already started")]
    DepartureStarted(Uuid),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CoreError> for BookingError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::ValidationError(msg) => BookingError::Validation(msg),
            CoreError::InternalError(msg) => BookingError::Store(StoreError::Database(msg)),
        }
    }
}

/// Creates reservations for the three booking paths.
pub struct ReservationService {
    store: Arc<dyn BookingStore>,
    policy: AgencyPolicy,
}

impl ReservationService {
    pub fn new(store: Arc<dyn BookingStore>, policy: AgencyPolicy) -> Self {
        Self { store, policy }
    }

    /// Self-service and staff bookings are created `pending` and leave
    /// inventory untouched. Agency bookings take their seats immediately,
    /// under the departure lock, and owe payment within the agency window.
    pub async fn create(
        &self,
        request: NewReservation,
        now: DateTime<Utc>,
    ) -> Result<Reservation, BookingError> {
        let persons = request.persons();
        if persons == 0 {
            return Err(BookingError::Validation(
                "at least one person is required".into(),
            ));
        }

        let customer = request.customer.clone().normalized();
        customer.validate_for(request.actor_role)?;

        let agency_code = match request.actor_role {
            ActorRole::Agency => Some(self.validate_agency(&request, persons)?),
            _ => None,
        };

        let departure = self
            .store
            .get_departure(request.departure_id)
            .await?
            .ok_or(BookingError::DepartureNotFound(request.departure_id))?;
        if departure.has_started(now.naive_utc()) {
            return Err(BookingError::DepartureStarted(departure.id));
        }
        if !departure.has_capacity(persons) {
            return Err(InventoryError::InsufficientCapacity {
                departure_id: departure.id,
                requested: persons,
                available: departure.capacity_remaining,
            }
            .into());
        }

        let amount_due = departure
            .pricing
            .quote(request.adult_count, request.child_count)?;

        let mut tx = self.store.begin().await?;
        let reservation = match agency_code {
            Some(code) => {
                // Capacity may have moved since the unlocked read above.
                let mut locked = tx
                    .lock_departure(departure.id)
                    .await?
                    .ok_or(BookingError::DepartureNotFound(departure.id))?;
                locked.take_seats(persons)?;

                let deadline = now + Duration::days(self.policy.payment_window_days);
                let reservation = Reservation::new_agency_block(
                    departure.id,
                    request.adult_count,
                    request.child_count,
                    amount_due,
                    customer,
                    code,
                    deadline,
                    request.created_by,
                );
                tx.insert_reservation(&reservation).await?;
                tx.save_departure_capacity(&locked).await?;
                reservation
            }
            None => {
                let reservation = Reservation::new_pending(
                    departure.id,
                    request.adult_count,
                    request.child_count,
                    amount_due,
                    customer,
                    request.actor_role,
                    request.created_by,
                );
                tx.insert_reservation(&reservation).await?;
                reservation
            }
        };
        tx.commit().await?;

        info!(
            reservation_id = %reservation.id,
            departure_id = %reservation.departure_id,
            persons,
            status = %reservation.status,
            "Reservation created"
        );
        Ok(reservation)
    }

    fn validate_agency(&self, request: &NewReservation, persons: u32) -> Result<String, BookingError> {
        if persons > self.policy.max_persons {
            return Err(BookingError::Validation(format!(
                "agency bookings are limited to {} persons",
                self.policy.max_persons
            )));
        }
        request
            .agency_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_string)
            .ok_or_else(|| BookingError::Validation("agency reference code is required".into()))
    }
}
