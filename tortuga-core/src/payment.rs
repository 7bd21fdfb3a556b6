use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::reservation::Reservation;
use crate::CoreError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    LemonSqueezy,
    PayPal,
    Cash,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::LemonSqueezy => "lemonsqueezy",
            PaymentProvider::PayPal => "paypal",
            PaymentProvider::Cash => "cash",
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentProvider {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lemonsqueezy" => Ok(PaymentProvider::LemonSqueezy),
            "paypal" => Ok(PaymentProvider::PayPal),
            "cash" => Ok(PaymentProvider::Cash),
            other => Err(CoreError::InternalError(format!("unknown payment provider {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Created,
    Approved,
    Paid,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(PaymentStatus::Created),
            "approved" => Ok(PaymentStatus::Approved),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(CoreError::InternalError(format!("unknown payment status {other}"))),
        }
    }
}

/// One attempt to pay for a reservation through one provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub provider: PaymentProvider,
    pub status: PaymentStatus,
    pub currency: String,
    pub amount_cents: i64,
    pub external_id: String,
    pub checkout_url: Option<String>,
    pub raw_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// A checkout was opened with the provider; nothing is paid yet.
    pub fn from_checkout(
        reservation: &Reservation,
        provider: PaymentProvider,
        currency: &str,
        checkout: Checkout,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reservation_id: reservation.id,
            provider,
            status: PaymentStatus::Created,
            currency: currency.to_string(),
            amount_cents: reservation.amount_due_cents,
            external_id: checkout.external_id,
            checkout_url: checkout.redirect_url,
            raw_payload: checkout.raw,
            created_at: now,
            updated_at: now,
        }
    }

    /// Settlement recorded without a prior checkout attempt (cash, manual).
    pub fn settled(
        reservation: &Reservation,
        evidence: &PaymentEvidence,
        currency: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reservation_id: reservation.id,
            provider: evidence.provider(),
            status: PaymentStatus::Paid,
            currency: currency.to_string(),
            amount_cents: reservation.amount_due_cents,
            external_id: evidence.external_id().unwrap_or_default().to_string(),
            checkout_url: None,
            raw_payload: evidence.raw_payload(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, PaymentStatus::Created | PaymentStatus::Approved)
    }

    /// Stamp this attempt as the settled one.
    pub fn mark_paid(&mut self, evidence: &PaymentEvidence) {
        self.status = PaymentStatus::Paid;
        if let Some(external_id) = evidence.external_id() {
            self.external_id = external_id.to_string();
        }
        self.raw_payload = evidence.raw_payload();
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, payload: serde_json::Value) {
        self.status = PaymentStatus::Failed;
        self.raw_payload = payload;
        self.updated_at = Utc::now();
    }

    /// Abandon an open attempt (its reservation was cancelled).
    pub fn mark_cancelled(&mut self) {
        self.status = PaymentStatus::Cancelled;
        self.updated_at = Utc::now();
    }
}

/// What a provider hands back when a checkout/order is opened.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub external_id: String,
    pub redirect_url: Option<String>,
    pub raw: serde_json::Value,
}

/// Verified proof of payment, parsed once at the adapter boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvidence {
    LemonSqueezyOrder {
        order_id: String,
        customer_email: Option<String>,
        raw: serde_json::Value,
    },
    PayPalCapture {
        order_id: String,
        payer_email: Option<String>,
        raw: serde_json::Value,
    },
    Cash {
        collected_by: String,
    },
}

impl PaymentEvidence {
    pub fn provider(&self) -> PaymentProvider {
        match self {
            PaymentEvidence::LemonSqueezyOrder { .. } => PaymentProvider::LemonSqueezy,
            PaymentEvidence::PayPalCapture { .. } => PaymentProvider::PayPal,
            PaymentEvidence::Cash { .. } => PaymentProvider::Cash,
        }
    }

    pub fn external_id(&self) -> Option<&str> {
        match self {
            PaymentEvidence::LemonSqueezyOrder { order_id, .. }
            | PaymentEvidence::PayPalCapture { order_id, .. } => {
                Some(order_id.as_str()).filter(|id| !id.is_empty())
            }
            PaymentEvidence::Cash { .. } => None,
        }
    }

    pub fn customer_email(&self) -> Option<&str> {
        match self {
            PaymentEvidence::LemonSqueezyOrder { customer_email, .. } => customer_email.as_deref(),
            PaymentEvidence::PayPalCapture { payer_email, .. } => payer_email.as_deref(),
            PaymentEvidence::Cash { .. } => None,
        }
    }

    pub fn raw_payload(&self) -> serde_json::Value {
        match self {
            PaymentEvidence::LemonSqueezyOrder { raw, .. }
            | PaymentEvidence::PayPalCapture { raw, .. } => raw.clone(),
            PaymentEvidence::Cash { collected_by } => serde_json::json!({
                "method": "cash",
                "user": collected_by,
            }),
        }
    }
}

/// A verified provider notification.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    PaymentSucceeded {
        reservation_id: Uuid,
        evidence: PaymentEvidence,
    },
    Refunded {
        reservation_id: Uuid,
        provider: PaymentProvider,
        external_id: Option<String>,
        raw: serde_json::Value,
    },
    Ignored {
        event_name: String,
        reason: String,
    },
}

/// Inbound webhook as received over HTTP. Header names are stored lowercased.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn json(&self) -> Result<serde_json::Value, ProviderError> {
        serde_json::from_slice(&self.body).map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

/// Result of a synchronous capture call.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub order_id: String,
    pub status: String,
    /// Reservation reference the order was created with, when echoed back.
    pub custom_id: Option<String>,
    /// Captured amount in minor units, when the response reports one.
    pub amount_cents: Option<i64>,
    pub payer_email: Option<String>,
    pub raw: serde_json::Value,
}

impl CaptureOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == "COMPLETED"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
    #[error("Provider request failed: {0}")]
    RequestFailed(String),
    #[error("Provider API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),
    #[error("Malformed event: {0}")]
    Malformed(String),
    #[error("Operation not supported by {0}")]
    Unsupported(&'static str),
}

/// Provider-specific checkout creation, webhook authentication and event parsing.
#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Open a checkout (or order) for the reservation's amount due.
    async fn create_checkout(&self, reservation: &Reservation) -> Result<Checkout, ProviderError>;

    /// Authenticate an inbound webhook. `Ok(false)` means reject.
    async fn verify_webhook(&self, request: &WebhookRequest) -> Result<bool, ProviderError>;

    /// Parse an already verified webhook body.
    async fn parse_event(&self, request: &WebhookRequest) -> Result<WebhookEvent, ProviderError>;

    /// Capture an approved order (capture-style providers only).
    async fn capture(&self, _order_id: &str) -> Result<CaptureOutcome, ProviderError> {
        Err(ProviderError::Unsupported(self.provider().as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evidence_accessors() {
        let cash = PaymentEvidence::Cash {
            collected_by: "maria".into(),
        };
        assert_eq!(cash.provider(), PaymentProvider::Cash);
        assert_eq!(cash.external_id(), None);
        assert_eq!(cash.raw_payload()["method"], "cash");

        let paypal = PaymentEvidence::PayPalCapture {
            order_id: String::new(),
            payer_email: Some("p@x.io".into()),
            raw: serde_json::json!({"id": "C1"}),
        };
        assert_eq!(paypal.external_id(), None);
        assert_eq!(paypal.customer_email(), Some("p@x.io"));
    }

    #[test]
    fn test_webhook_request_headers_are_case_insensitive() {
        let req = WebhookRequest::new(b"{}".to_vec()).with_header("X-Signature", "abc");
        assert_eq!(req.header("x-signature"), Some("abc"));
        assert_eq!(req.header("X-SIGNATURE"), Some("abc"));
        assert!(req.header("paypal-transmission-id").is_none());
        assert!(req.json().unwrap().is_object());
    }

    #[test]
    fn test_provider_strings() {
        assert_eq!("paypal".parse::<PaymentProvider>().unwrap(), PaymentProvider::PayPal);
        assert_eq!(PaymentProvider::LemonSqueezy.to_string(), "lemonsqueezy");
        assert!("efectivo".parse::<PaymentProvider>().is_err());
        assert_eq!("approved".parse::<PaymentStatus>().unwrap(), PaymentStatus::Approved);
    }
}
