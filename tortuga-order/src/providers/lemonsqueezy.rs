//! Lemon Squeezy: hosted checkouts, webhooks signed with HMAC-SHA256.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use sha2::Sha256;
use tortuga_core::config::{LemonSqueezySettings, PaymentSettings};
use tortuga_core::payment::{
    Checkout, PaymentAdapter, PaymentEvidence, PaymentProvider, ProviderError, WebhookEvent,
    WebhookRequest,
};
use tortuga_core::reservation::Reservation;
use tracing::{debug, warn};

use super::{id_string, non_empty, read_json, request_failed, reservation_ref};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Signature";
const JSON_API: &str = "application/vnd.api+json";

pub struct LemonSqueezyAdapter {
    http: reqwest::Client,
    settings: LemonSqueezySettings,
    site_url: String,
}

impl LemonSqueezyAdapter {
    pub fn new(settings: &PaymentSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    pub fn with_client(http: reqwest::Client, settings: &PaymentSettings) -> Self {
        Self {
            http,
            settings: settings.lemonsqueezy.clone(),
            site_url: settings.site_url().to_string(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.api_base.trim_end_matches('/'), path)
    }

    fn checkout_document(&self, reservation: &Reservation) -> Value {
        json!({
            "data": {
                "type": "checkouts",
                "attributes": {
                    "custom_price": reservation.amount_due_cents,
                    "product_options": {
                        "redirect_url": format!("{}/?pago=ok", self.site_url),
                    },
                    "checkout_data": {
                        "email": reservation.customer.email.expose(),
                        "name": reservation.customer.name,
                        "custom": { "reserva_id": reservation.id.to_string() },
                    },
                },
                "relationships": {
                    "store": { "data": { "type": "stores", "id": self.settings.store_id } },
                    "variant": { "data": { "type": "variants", "id": self.settings.variant_id } },
                },
            }
        })
    }
}

/// Hex HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of `signature` (hex) against the body's HMAC.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn customer_email(payload: &Value) -> Option<String> {
    let attributes = &payload["data"]["attributes"];
    non_empty(&attributes["user_email"])
        .or_else(|| non_empty(&attributes["first_order_item"]["user_email"]))
}

#[async_trait]
impl PaymentAdapter for LemonSqueezyAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::LemonSqueezy
    }

    async fn create_checkout(&self, reservation: &Reservation) -> Result<Checkout, ProviderError> {
        if self.settings.api_key.is_empty()
            || self.settings.store_id.is_empty()
            || self.settings.variant_id.is_empty()
        {
            return Err(ProviderError::NotConfigured(
                "lemonsqueezy api_key, store_id and variant_id are required".into(),
            ));
        }

        let response = self
            .http
            .post(self.api_url("checkouts"))
            .bearer_auth(&self.settings.api_key)
            .header(ACCEPT, JSON_API)
            .header(CONTENT_TYPE, JSON_API)
            .body(self.checkout_document(reservation).to_string())
            .send()
            .await
            .map_err(request_failed)?;
        let body = read_json(response).await?;

        let external_id = id_string(&body["data"]["id"])
            .ok_or_else(|| ProviderError::InvalidResponse("checkout without data.id".into()))?;
        let redirect_url = non_empty(&body["data"]["attributes"]["url"]);
        debug!(reservation_id = %reservation.id, checkout_id = %external_id, "Lemon Squeezy checkout created");

        Ok(Checkout {
            external_id,
            redirect_url,
            raw: body,
        })
    }

    async fn verify_webhook(&self, request: &WebhookRequest) -> Result<bool, ProviderError> {
        if self.settings.webhook_secret.is_empty() {
            warn!("Lemon Squeezy webhook secret is not configured; rejecting");
            return Ok(false);
        }
        let Some(signature) = request.header(SIGNATURE_HEADER) else {
            return Ok(false);
        };
        Ok(verify_signature(
            &self.settings.webhook_secret,
            &request.body,
            signature,
        ))
    }

    async fn parse_event(&self, request: &WebhookRequest) -> Result<WebhookEvent, ProviderError> {
        let payload = request.json()?;
        let event_name = payload["meta"]["event_name"]
            .as_str()
            .ok_or_else(|| ProviderError::Malformed("missing meta.event_name".into()))?
            .to_string();

        if event_name != "order_created" && event_name != "order_refunded" {
            return Ok(WebhookEvent::Ignored {
                event_name,
                reason: "event not handled".into(),
            });
        }

        let Some(reservation_id) = reservation_ref(&payload["meta"]["custom_data"]["reserva_id"]) else {
            return Ok(WebhookEvent::Ignored {
                event_name,
                reason: "no reservation reference in custom data".into(),
            });
        };
        let order_id = id_string(&payload["data"]["id"]);

        if event_name == "order_refunded" {
            return Ok(WebhookEvent::Refunded {
                reservation_id,
                provider: PaymentProvider::LemonSqueezy,
                external_id: order_id,
                raw: payload,
            });
        }

        Ok(WebhookEvent::PaymentSucceeded {
            reservation_id,
            evidence: PaymentEvidence::LemonSqueezyOrder {
                order_id: order_id.unwrap_or_default(),
                customer_email: customer_email(&payload),
                raw: payload,
            },
        })
    }
}
