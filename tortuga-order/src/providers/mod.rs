//! Payment provider adapters.

pub mod lemonsqueezy;
pub mod paypal;

pub use lemonsqueezy::LemonSqueezyAdapter;
pub use paypal::PayPalAdapter;

use serde_json::Value;
use tortuga_core::payment::ProviderError;
use uuid::Uuid;

pub(crate) fn request_failed(e: reqwest::Error) -> ProviderError {
    ProviderError::RequestFailed(e.to_string())
}

/// Read a JSON body, turning non-2xx statuses into `ProviderError::Api`.
pub(crate) async fn read_json(response: reqwest::Response) -> Result<Value, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

/// String field that providers sometimes send as a number.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn reservation_ref(value: &Value) -> Option<Uuid> {
    id_string(value).and_then(|s| Uuid::parse_str(&s).ok())
}

pub(crate) fn non_empty(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
