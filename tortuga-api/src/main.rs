use anyhow::Context;
use chrono::{Duration as ChronoDuration, NaiveTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tortuga_api::{app, worker, AppState, AuthConfig};
use tortuga_catalog::{Departure, Tour, TourPricing};
use tortuga_core::notify::{LogNotifier, TicketNotifier};
use tortuga_core::repository::BookingStore;
use tortuga_order::AgencyDeadlineSweeper;
use tortuga_store::app_config::Config;
use tortuga_store::{DbClient, EventProducer, KafkaNotifier, MemoryBookingStore, PgBookingStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tortuga_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Tortuga API on port {}", config.server.port);

    let store = connect_store(&config).await?;
    let notifier = connect_notifier(&config)?;

    let sweeper = Arc::new(AgencyDeadlineSweeper::new(
        store.clone(),
        notifier.clone(),
        config.agency.clone(),
    ));
    let every = Duration::from_secs(config.agency.sweep_interval_seconds.max(1));
    tokio::spawn(worker::start_agency_deadline_worker(sweeper, every));

    let state = AppState::new(
        store,
        notifier,
        config.payments.clone(),
        config.agency.clone(),
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app(state)).await.context("Server error")?;
    Ok(())
}

async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn BookingStore>> {
    if config.database.url.is_empty() {
        tracing::warn!("No database configured, using the in-memory store");
        let store = MemoryBookingStore::new();
        seed_demo_departure(&store).await?;
        return Ok(Arc::new(store));
    }

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    Ok(Arc::new(PgBookingStore::new(db.pool)))
}

fn connect_notifier(config: &Config) -> anyhow::Result<Arc<dyn TicketNotifier>> {
    if config.kafka.brokers.is_empty() {
        tracing::warn!("No Kafka brokers configured, notifications go to the log");
        return Ok(Arc::new(LogNotifier));
    }

    let producer = EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?;
    Ok(Arc::new(KafkaNotifier::new(producer, config.kafka.notification_topic.clone())))
}

/// Gives local runs without a database something to book.
async fn seed_demo_departure(store: &MemoryBookingStore) -> anyhow::Result<()> {
    let pricing = TourPricing::from_decimal("45.00", "22.50").context("Invalid demo pricing")?;
    let tour = Tour::new("Isla de la Plata", pricing);
    let date = (Utc::now() + ChronoDuration::days(14)).date_naive();
    let departure = Departure::new(&tour, date, NaiveTime::from_hms_opt(8, 0, 0), 16);

    tracing::info!(departure_id = %departure.id, "Seeded demo departure");
    store.add_departure(departure).await;
    Ok(())
}
