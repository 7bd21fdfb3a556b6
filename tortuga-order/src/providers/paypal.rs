//! PayPal Orders v2: create, capture, and webhooks verified remotely.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tortuga_core::config::{PayPalSettings, PaymentSettings};
use tortuga_core::payment::{
    CaptureOutcome, Checkout, PaymentAdapter, PaymentEvidence, PaymentProvider, ProviderError,
    WebhookEvent, WebhookRequest,
};
use tortuga_core::reservation::Reservation;
use tortuga_shared::{format_minor_units, parse_minor_units};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{non_empty, read_json, request_failed};

pub const CAPTURE_COMPLETED: &str = "PAYMENT.CAPTURE.COMPLETED";
pub const CAPTURE_REFUNDED: &str = "PAYMENT.CAPTURE.REFUNDED";

/// Transmission headers forwarded to the verification endpoint, with the
/// field name each one takes there.
const TRANSMISSION_HEADERS: [(&str, &str); 5] = [
    ("PAYPAL-AUTH-ALGO", "auth_algo"),
    ("PAYPAL-CERT-URL", "cert_url"),
    ("PAYPAL-TRANSMISSION-ID", "transmission_id"),
    ("PAYPAL-TRANSMISSION-SIG", "transmission_sig"),
    ("PAYPAL-TRANSMISSION-TIME", "transmission_time"),
];

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct PayPalAdapter {
    http: reqwest::Client,
    settings: PayPalSettings,
    base_url: String,
    currency: String,
    site_url: String,
}

impl PayPalAdapter {
    pub fn new(settings: &PaymentSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    pub fn with_client(http: reqwest::Client, settings: &PaymentSettings) -> Self {
        Self {
            http,
            base_url: settings.paypal.base_url(),
            settings: settings.paypal.clone(),
            currency: settings.currency(),
            site_url: settings.site_url().to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        if self.settings.client_id.is_empty() || self.settings.client_secret.is_empty() {
            return Err(ProviderError::NotConfigured(
                "paypal client_id and client_secret are required".into(),
            ));
        }
        let response = self
            .http
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(request_failed)?;
        let body = read_json(response).await?;
        let token: TokenResponse = serde_json::from_value(body)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(token.access_token)
    }

    async fn fetch_order(&self, order_id: &str) -> Result<Value, ProviderError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.url(&format!("/v2/checkout/orders/{order_id}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(request_failed)?;
        read_json(response).await
    }

    /// Reservation reference of a capture/refund resource, looking the order
    /// up when the resource does not echo `custom_id`.
    async fn resolve_reference(
        &self,
        resource: &Value,
        order_id: Option<&str>,
    ) -> Result<(Option<String>, Option<String>), ProviderError> {
        if let Some(custom_id) = non_empty(&resource["custom_id"]) {
            return Ok((Some(custom_id), None));
        }
        let Some(order_id) = order_id else {
            return Ok((None, None));
        };
        let order = self.fetch_order(order_id).await?;
        Ok((
            non_empty(&order["purchase_units"][0]["custom_id"]),
            non_empty(&order["payer"]["email_address"]),
        ))
    }
}

fn related_order_id(resource: &Value) -> Option<String> {
    non_empty(&resource["supplementary_data"]["related_ids"]["order_id"])
}

#[async_trait]
impl PaymentAdapter for PayPalAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::PayPal
    }

    async fn create_checkout(&self, reservation: &Reservation) -> Result<Checkout, ProviderError> {
        let token = self.access_token().await?;
        let reference = reservation.id.to_string();
        let order = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": reference,
                "custom_id": reference,
                "description": format!("Reserva {}", reservation.short_id()),
                "amount": {
                    "currency_code": self.currency,
                    "value": format_minor_units(reservation.amount_due_cents),
                },
            }],
            "application_context": {
                "return_url": format!("{}/?pago=ok", self.site_url),
                "cancel_url": format!("{}/?pago=cancel", self.site_url),
            },
        });

        let response = self
            .http
            .post(self.url("/v2/checkout/orders"))
            .bearer_auth(token)
            .json(&order)
            .send()
            .await
            .map_err(request_failed)?;
        let body = read_json(response).await?;

        let external_id = non_empty(&body["id"])
            .ok_or_else(|| ProviderError::InvalidResponse("order without id".into()))?;
        let redirect_url = body["links"].as_array().and_then(|links| {
            links
                .iter()
                .find(|link| link["rel"] == "approve")
                .and_then(|link| non_empty(&link["href"]))
        });
        debug!(reservation_id = %reservation.id, order_id = %external_id, "PayPal order created");

        Ok(Checkout {
            external_id,
            redirect_url,
            raw: body,
        })
    }

    async fn verify_webhook(&self, request: &WebhookRequest) -> Result<bool, ProviderError> {
        if self.settings.webhook_id.is_empty() {
            warn!("PayPal webhook id is not configured; rejecting");
            return Ok(false);
        }

        let mut verification = serde_json::Map::new();
        for (header, field) in TRANSMISSION_HEADERS {
            match request.header(header) {
                Some(value) if !value.is_empty() => {
                    verification.insert(field.to_string(), Value::String(value.to_string()));
                }
                _ => return Ok(false),
            }
        }
        verification.insert("webhook_id".into(), Value::String(self.settings.webhook_id.clone()));
        verification.insert("webhook_event".into(), request.json()?);

        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.url("/v1/notifications/verify-webhook-signature"))
            .bearer_auth(token)
            .json(&Value::Object(verification))
            .send()
            .await
            .map_err(request_failed)?;
        let body = read_json(response).await?;

        Ok(body["verification_status"] == "SUCCESS")
    }

    async fn parse_event(&self, request: &WebhookRequest) -> Result<WebhookEvent, ProviderError> {
        let payload = request.json()?;
        let event_name = payload["event_type"]
            .as_str()
            .ok_or_else(|| ProviderError::Malformed("missing event_type".into()))?
            .to_string();

        if event_name != CAPTURE_COMPLETED && event_name != CAPTURE_REFUNDED {
            return Ok(WebhookEvent::Ignored {
                event_name,
                reason: "event not handled".into(),
            });
        }

        let resource = &payload["resource"];
        let order_id = related_order_id(resource);
        let (reference, payer_email) = self.resolve_reference(resource, order_id.as_deref()).await?;
        let Some(reservation_id) = reference.as_deref().and_then(|r| Uuid::parse_str(r).ok()) else {
            return Ok(WebhookEvent::Ignored {
                event_name,
                reason: "no reservation reference on capture".into(),
            });
        };

        if event_name == CAPTURE_REFUNDED {
            return Ok(WebhookEvent::Refunded {
                reservation_id,
                provider: PaymentProvider::PayPal,
                external_id: order_id,
                raw: payload,
            });
        }

        let order_id = order_id.or_else(|| non_empty(&resource["id"])).unwrap_or_default();
        Ok(WebhookEvent::PaymentSucceeded {
            reservation_id,
            evidence: PaymentEvidence::PayPalCapture {
                order_id,
                payer_email,
                raw: payload,
            },
        })
    }

    async fn capture(&self, order_id: &str) -> Result<CaptureOutcome, ProviderError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.url(&format!("/v2/checkout/orders/{order_id}/capture")))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await
            .map_err(request_failed)?;
        let body = read_json(response).await?;

        let unit = &body["purchase_units"][0];
        let capture = &unit["payments"]["captures"][0];
        let custom_id = non_empty(&unit["custom_id"]).or_else(|| non_empty(&capture["custom_id"]));
        let amount_cents = non_empty(&capture["amount"]["value"]).and_then(|v| parse_minor_units(&v).ok());

        Ok(CaptureOutcome {
            order_id: non_empty(&body["id"]).unwrap_or_else(|| order_id.to_string()),
            status: body["status"].as_str().unwrap_or_default().to_string(),
            custom_id,
            amount_cents,
            payer_email: non_empty(&body["payer"]["email_address"]),
            raw: body,
        })
    }
}
