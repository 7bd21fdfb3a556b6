use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tortuga_catalog::{Departure, TourPricing};
use tortuga_core::payment::{Payment, PaymentProvider};
use tortuga_core::repository::{BookingStore, BookingTx, LockedBooking, StoreError};
use tortuga_core::reservation::{CustomerInfo, Reservation};
use tortuga_shared::Masked;
use uuid::Uuid;

const DEPARTURE_SELECT: &str = r#"
    SELECT d.id, d.tour_id, t.name AS tour_name, d.departure_date, d.departure_time,
           d.capacity_max, d.capacity_remaining, t.adult_price_cents, t.child_price_cents
    FROM departures d
    JOIN tours t ON t.id = d.tour_id
    WHERE d.id = $1
"#;

const RESERVATION_COLUMNS: &str = r#"
    id, departure_id, adult_count, child_count, amount_due_cents, status,
    customer_name, customer_surname, customer_email, customer_phone, customer_identification,
    agency_code, agency_payment_deadline, created_by, actor_role, seats_held,
    created_at, updated_at
"#;

const PAYMENT_COLUMNS: &str = r#"
    id, reservation_id, provider, status, currency, amount_cents, external_id,
    checkout_url, raw_payload, created_at, updated_at
"#;

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn to_u32(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {column}: {value}")))
}

fn to_i32(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("value out of range: {value}")))
}

#[derive(sqlx::FromRow)]
struct DepartureRow {
    id: Uuid,
    tour_id: Uuid,
    tour_name: String,
    departure_date: NaiveDate,
    departure_time: Option<NaiveTime>,
    capacity_max: i32,
    capacity_remaining: i32,
    adult_price_cents: i64,
    child_price_cents: i64,
}

impl TryFrom<DepartureRow> for Departure {
    type Error = StoreError;

    fn try_from(row: DepartureRow) -> Result<Self, Self::Error> {
        Ok(Departure {
            id: row.id,
            tour_id: row.tour_id,
            tour_name: row.tour_name,
            date: row.departure_date,
            time: row.departure_time,
            capacity_max: to_u32(row.capacity_max, "capacity_max")?,
            capacity_remaining: to_u32(row.capacity_remaining, "capacity_remaining")?,
            pricing: TourPricing::new(row.adult_price_cents, row.child_price_cents),
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    departure_id: Uuid,
    adult_count: i32,
    child_count: i32,
    amount_due_cents: i64,
    status: String,
    customer_name: String,
    customer_surname: String,
    customer_email: String,
    customer_phone: String,
    customer_identification: String,
    agency_code: Option<String>,
    agency_payment_deadline: Option<DateTime<Utc>>,
    created_by: Option<String>,
    actor_role: String,
    seats_held: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            id: row.id,
            departure_id: row.departure_id,
            adult_count: to_u32(row.adult_count, "adult_count")?,
            child_count: to_u32(row.child_count, "child_count")?,
            amount_due_cents: row.amount_due_cents,
            status: row
                .status
                .parse()
                .map_err(|e: tortuga_core::CoreError| StoreError::Corrupt(e.to_string()))?,
            customer: CustomerInfo {
                name: row.customer_name,
                surname: row.customer_surname,
                email: Masked(row.customer_email),
                phone: Masked(row.customer_phone),
                identification: Masked(row.customer_identification),
            },
            agency_code: row.agency_code,
            agency_payment_deadline: row.agency_payment_deadline,
            created_by: row.created_by,
            actor_role: row
                .actor_role
                .parse()
                .map_err(|e: tortuga_core::CoreError| StoreError::Corrupt(e.to_string()))?,
            seats_held: row.seats_held,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    reservation_id: Uuid,
    provider: String,
    status: String,
    currency: String,
    amount_cents: i64,
    external_id: String,
    checkout_url: Option<String>,
    raw_payload: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let corrupt = |e: tortuga_core::CoreError| StoreError::Corrupt(e.to_string());
        Ok(Payment {
            id: row.id,
            reservation_id: row.reservation_id,
            provider: row.provider.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            currency: row.currency,
            amount_cents: row.amount_cents,
            external_id: row.external_id,
            checkout_url: row.checkout_url,
            raw_payload: row.raw_payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn collect_payments(rows: Vec<PaymentRow>) -> Result<Vec<Payment>, StoreError> {
    rows.into_iter().map(Payment::try_from).collect()
}

/// Postgres-backed booking store. Locks are `SELECT ... FOR UPDATE` row locks.
#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub struct PgBookingTx {
    tx: Transaction<'static, Postgres>,
}

async fn insert_payment_with<'e, E>(executor: E, payment: &Payment) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO payments (id, reservation_id, provider, status, currency, amount_cents,
                              external_id, checkout_url, raw_payload, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(payment.id)
    .bind(payment.reservation_id)
    .bind(payment.provider.as_str())
    .bind(payment.status.as_str())
    .bind(&payment.currency)
    .bind(payment.amount_cents)
    .bind(&payment.external_id)
    .bind(&payment.checkout_url)
    .bind(&payment.raw_payload)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(executor)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl BookingTx for PgBookingTx {
    async fn lock_booking(&mut self, reservation_id: Uuid) -> Result<Option<LockedBooking>, StoreError> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(reservation_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let reservation = Reservation::try_from(row)?;

        let departure = self
            .lock_departure(reservation.departure_id)
            .await?
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
        let sql = format!("{DEPARTURE_SELECT} FOR UPDATE OF d");
        let row = sqlx::query_as::<_, DepartureRow>(&sql)
            .bind(departure_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        row.map(Departure::try_from).transpose()
    }

    async fn payment_by_external_id(
        &mut self,
        reservation_id: Uuid,
        provider: PaymentProvider,
        external_id: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE reservation_id = $1 AND provider = $2 AND external_id = $3 \
             ORDER BY created_at DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(reservation_id)
            .bind(provider.as_str())
            .bind(external_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        row.map(Payment::try_from).transpose()
    }

    async fn latest_open_payment(
        &mut self,
        reservation_id: Uuid,
        provider: PaymentProvider,
    ) -> Result<Option<Payment>, StoreError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE reservation_id = $1 AND provider = $2 AND status IN ('created', 'approved') \
             ORDER BY created_at DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(reservation_id)
            .bind(provider.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        row.map(Payment::try_from).transpose()
    }

    async fn payments_for_provider(
        &mut self,
        reservation_id: Uuid,
        provider: PaymentProvider,
    ) -> Result<Vec<Payment>, StoreError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE reservation_id = $1 AND provider = $2 ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(reservation_id)
            .bind(provider.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_err)?;
        collect_payments(rows)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reservations (
                id, departure_id, adult_count, child_count, amount_due_cents, status,
                customer_name, customer_surname, customer_email, customer_phone, customer_identification,
                agency_code, agency_payment_deadline, created_by, actor_role, seats_held,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.departure_id)
        .bind(to_i32(reservation.adult_count)?)
        .bind(to_i32(reservation.child_count)?)
        .bind(reservation.amount_due_cents)
        .bind(reservation.status.as_str())
        .bind(&reservation.customer.name)
        .bind(&reservation.customer.surname)
        .bind(reservation.customer.email.expose())
        .bind(reservation.customer.phone.expose())
        .bind(reservation.customer.identification.expose())
        .bind(&reservation.agency_code)
        .bind(reservation.agency_payment_deadline)
        .bind(&reservation.created_by)
        .bind(reservation.actor_role.as_str())
        .bind(reservation.seats_held)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn save_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE reservations
            SET status = $2, customer_email = $3, agency_payment_deadline = $4,
                seats_held = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.status.as_str())
        .bind(reservation.customer.email.expose())
        .bind(reservation.agency_payment_deadline)
        .bind(reservation.seats_held)
        .bind(reservation.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn save_departure_capacity(&mut self, departure: &Departure) -> Result<(), StoreError> {
        sqlx::query("UPDATE departures SET capacity_remaining = $2 WHERE id = $1")
            .bind(departure.id)
            .bind(to_i32(departure.capacity_remaining)?)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        insert_payment_with(&mut *self.tx, payment).await
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, currency = $3, amount_cents = $4, external_id = $5,
                raw_payload = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(payment.status.as_str())
        .bind(&payment.currency)
        .bind(payment.amount_cents)
        .bind(&payment.external_id)
        .bind(&payment.raw_payload)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(db_err)
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn begin(&self) -> Result<Box<dyn BookingTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgBookingTx { tx }))
    }

    async fn get_departure(&self, departure_id: Uuid) -> Result<Option<Departure>, StoreError> {
        let row = sqlx::query_as::<_, DepartureRow>(DEPARTURE_SELECT)
            .bind(departure_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Departure::try_from).transpose()
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> Result<Option<Reservation>, StoreError> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");
        let row = sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(reservation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Reservation::try_from).transpose()
    }

    async fn list_payments(&self, reservation_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE reservation_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(reservation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        collect_payments(rows)
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        insert_payment_with(&self.pool, payment).await
    }

    async fn lapsed_agency_blocks(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM reservations
            WHERE status = 'agency_blocked' AND agency_payment_deadline < $1
            ORDER BY agency_payment_deadline
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}
