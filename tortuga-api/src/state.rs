use std::sync::Arc;
use tortuga_core::config::{AgencyPolicy, PaymentSettings};
use tortuga_core::notify::TicketNotifier;
use tortuga_core::repository::BookingStore;
use tortuga_order::{
    CheckoutService, LemonSqueezyAdapter, PayPalAdapter, PaymentOrchestrator, ReconciliationEngine,
    ReservationService,
};

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BookingStore>,
    pub reservations: Arc<ReservationService>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub payments: PaymentSettings,
    pub auth: AuthConfig,
}

impl AppState {
    /// Wire the booking services and both payment providers over one store.
    pub fn new(
        store: Arc<dyn BookingStore>,
        notifier: Arc<dyn TicketNotifier>,
        payments: PaymentSettings,
        agency: AgencyPolicy,
        auth: AuthConfig,
    ) -> Self {
        let currency = payments.currency();
        let engine = Arc::new(ReconciliationEngine::new(store.clone(), notifier, currency.clone()));
        let orchestrator = PaymentOrchestrator::new(engine, CheckoutService::new(store.clone(), currency))
            .with_adapter(Arc::new(LemonSqueezyAdapter::new(&payments)))
            .with_adapter(Arc::new(PayPalAdapter::new(&payments)));

        Self {
            reservations: Arc::new(ReservationService::new(store.clone(), agency)),
            orchestrator: Arc::new(orchestrator),
            store,
            payments,
            auth,
        }
    }
}
