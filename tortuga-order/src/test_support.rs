use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use tortuga_catalog::{Departure, Tour, TourPricing};
use tortuga_core::notify::{NotifyError, TicketNotifier};
use tortuga_core::reservation::{ActorRole, CustomerInfo, Reservation};
use tortuga_shared::models::events::{
    AgencyDeadlineLapsedEvent, AgencyPaymentReceivedEvent, TicketIssuedEvent,
};
use tortuga_store::MemoryBookingStore;

/// Remembers every notification; can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn kinds(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, kind: &str) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(kind.to_string());
        if self.fail {
            return Err(NotifyError("smtp unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TicketNotifier for RecordingNotifier {
    async fn ticket_issued(&self, _event: &TicketIssuedEvent) -> Result<(), NotifyError> {
        self.record("ticket_issued")
    }

    async fn agency_payment_received(&self, _event: &AgencyPaymentReceivedEvent) -> Result<(), NotifyError> {
        self.record("agency_payment_received")
    }

    async fn agency_deadline_lapsed(&self, _event: &AgencyDeadlineLapsedEvent) -> Result<(), NotifyError> {
        self.record("agency_deadline_lapsed")
    }
}

pub fn departure(capacity: u32) -> Departure {
    let tour = Tour::new("Isla de la Plata", TourPricing::new(5000, 2500));
    let date = (Utc::now() + Duration::days(30)).date_naive();
    Departure::new(&tour, date, None, capacity)
}

pub async fn store_with_departure(capacity: u32) -> (Arc<MemoryBookingStore>, Departure) {
    let store = Arc::new(MemoryBookingStore::new());
    let dep = departure(capacity);
    store.add_departure(dep.clone()).await;
    (store, dep)
}

pub fn customer() -> CustomerInfo {
    CustomerInfo {
        name: "Ana".into(),
        surname: "Paredes".into(),
        email: "ana@example.com".into(),
        phone: "+593 99 000 0000".into(),
        identification: "0102030405".into(),
    }
}

pub async fn pending_reservation(
    store: &MemoryBookingStore,
    departure: &Departure,
    adults: u32,
) -> Reservation {
    let reservation = Reservation::new_pending(
        departure.id,
        adults,
        0,
        departure.pricing.quote(adults, 0).unwrap(),
        customer(),
        ActorRole::SelfService,
        None,
    );
    store.add_reservation(reservation.clone()).await;
    reservation
}
