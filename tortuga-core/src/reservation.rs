use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tortuga_shared::Masked;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// Reservation state machine:
///
/// ```text
/// pending ──────────────► paid
///    │  ▲                   ▲
///    │  │ (deadline lapse)  │
///    │  └── agency_blocked ─┘
///    ▼           │
/// cancelled ◄────┘
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    AgencyBlocked,
    Paid,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::AgencyBlocked => "agency_blocked",
            ReservationStatus::Paid => "paid",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "agency_blocked" => Ok(ReservationStatus::AgencyBlocked),
            "paid" => Ok(ReservationStatus::Paid),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(CoreError::InternalError(format!("unknown reservation status {other}"))),
        }
    }
}

/// Who created the reservation. Selects the creation path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    SelfService,
    Staff,
    Agency,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::SelfService => "self_service",
            ActorRole::Staff => "staff",
            ActorRole::Agency => "agency",
        }
    }
}

impl FromStr for ActorRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self_service" => Ok(ActorRole::SelfService),
            "staff" => Ok(ActorRole::Staff),
            "agency" => Ok(ActorRole::Agency),
            other => Err(CoreError::InternalError(format!("unknown actor role {other}"))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerInfo {
    pub name: String,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub email: Masked<String>,
    #[serde(default)]
    pub phone: Masked<String>,
    #[serde(default)]
    pub identification: Masked<String>,
}

impl CustomerInfo {
    /// Trim every field and lowercase the email.
    pub fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            surname: self.surname.trim().to_string(),
            email: Masked(self.email.0.trim().to_lowercase()),
            phone: Masked(self.phone.0.trim().to_string()),
            identification: Masked(self.identification.0.trim().to_string()),
        }
    }

    /// Staff-assisted bookings need the full record; self-service needs enough
    /// to identify the traveller; agencies answer for their own customers.
    pub fn validate_for(&self, role: ActorRole) -> CoreResult<()> {
        let mut missing = Vec::new();
        if self.name.is_empty() {
            missing.push("name");
        }
        match role {
            ActorRole::Staff => {
                if self.surname.is_empty() {
                    missing.push("surname");
                }
                if self.email.0.is_empty() {
                    missing.push("email");
                }
                if self.phone.0.is_empty() {
                    missing.push("phone");
                }
                if self.identification.0.is_empty() {
                    missing.push("identification");
                }
            }
            ActorRole::SelfService => {
                if self.phone.0.is_empty() {
                    missing.push("phone");
                }
                if self.identification.0.is_empty() {
                    missing.push("identification");
                }
            }
            ActorRole::Agency => {}
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoreError::ValidationError(format!(
                "missing customer fields: {}",
                missing.join(", ")
            )))
        }
    }
}

/// A claim on seats of one departure.
///
/// `seats_held` records whether this reservation's persons are currently
/// deducted from the departure. It turns true exactly once (agency block or
/// payment confirmation) and only cancellation or a releasing lapse clears it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub id: Uuid,
    pub departure_id: Uuid,
    pub adult_count: u32,
    pub child_count: u32,
    pub amount_due_cents: i64,
    pub status: ReservationStatus,
    pub customer: CustomerInfo,
    pub agency_code: Option<String>,
    pub agency_payment_deadline: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub actor_role: ActorRole,
    pub seats_held: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new_pending(
        departure_id: Uuid,
        adult_count: u32,
        child_count: u32,
        amount_due_cents: i64,
        customer: CustomerInfo,
        actor_role: ActorRole,
        created_by: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            departure_id,
            adult_count,
            child_count,
            amount_due_cents,
            status: ReservationStatus::Pending,
            customer,
            agency_code: None,
            agency_payment_deadline: None,
            created_by,
            actor_role,
            seats_held: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Agency reservation: seats are deducted by the caller in the same
    /// transaction that inserts this row.
    #[allow(clippy::too_many_arguments)]
    pub fn new_agency_block(
        departure_id: Uuid,
        adult_count: u32,
        child_count: u32,
        amount_due_cents: i64,
        customer: CustomerInfo,
        agency_code: String,
        deadline: DateTime<Utc>,
        created_by: Option<String>,
    ) -> Self {
        let mut reservation = Self::new_pending(
            departure_id,
            adult_count,
            child_count,
            amount_due_cents,
            customer,
            ActorRole::Agency,
            created_by,
        );
        reservation.status = ReservationStatus::AgencyBlocked;
        reservation.agency_code = Some(agency_code);
        reservation.agency_payment_deadline = Some(deadline);
        reservation.seats_held = true;
        reservation
    }

    pub fn persons(&self) -> u32 {
        self.adult_count + self.child_count
    }

    pub fn is_payable(&self) -> bool {
        matches!(
            self.status,
            ReservationStatus::Pending | ReservationStatus::AgencyBlocked
        )
    }

    pub fn agency_deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::AgencyBlocked
            && self.agency_payment_deadline.map(|d| d < now).unwrap_or(false)
    }

    /// Transition: pending | agency_blocked → paid. Returns the previous status.
    pub fn mark_paid(&mut self) -> Result<ReservationStatus, ReservationError> {
        let previous = self.status;
        if !self.is_payable() {
            return Err(ReservationError::InvalidTransition {
                from: previous,
                to: ReservationStatus::Paid,
            });
        }
        self.set_status(ReservationStatus::Paid);
        Ok(previous)
    }

    /// Transition: pending | agency_blocked → cancelled. Returns the previous status.
    pub fn cancel(&mut self) -> Result<ReservationStatus, ReservationError> {
        let previous = self.status;
        if !self.is_payable() {
            return Err(ReservationError::InvalidTransition {
                from: previous,
                to: ReservationStatus::Cancelled,
            });
        }
        self.set_status(ReservationStatus::Cancelled);
        Ok(previous)
    }

    /// Transition: agency_blocked → pending (payment window lapsed).
    pub fn lapse_agency_block(&mut self) -> Result<(), ReservationError> {
        if self.status != ReservationStatus::AgencyBlocked {
            return Err(ReservationError::InvalidTransition {
                from: self.status,
                to: ReservationStatus::Pending,
            });
        }
        self.set_status(ReservationStatus::Pending);
        Ok(())
    }

    /// Replace the stored email when a provider reports a different one.
    /// Returns true if it changed.
    pub fn update_customer_email(&mut self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        if email.is_empty() || self.customer.email.0 == email {
            return false;
        }
        self.customer.email = Masked(email);
        self.updated_at = Utc::now();
        true
    }

    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_uppercase()
    }

    fn set_status(&mut self, status: ReservationStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReservationError {
    #[error("Reservation not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
}
