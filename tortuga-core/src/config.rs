//! Settings injected into adapters and services at construction time.

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentSettings {
    #[serde(default = "default_currency")]
    pub currency: String,
    pub site_url: String,
    pub lemonsqueezy: LemonSqueezySettings,
    pub paypal: PayPalSettings,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl PaymentSettings {
    pub fn currency(&self) -> String {
        self.currency.to_uppercase()
    }

    pub fn site_url(&self) -> &str {
        self.site_url.trim_end_matches('/')
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LemonSqueezySettings {
    #[serde(default = "default_lemonsqueezy_api")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub store_id: String,
    #[serde(default)]
    pub variant_id: String,
    #[serde(default)]
    pub webhook_secret: String,
}

fn default_lemonsqueezy_api() -> String {
    "https://api.lemonsqueezy.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PayPalSettings {
    /// "live" or "sandbox".
    #[serde(default)]
    pub environment: String,
    /// Overrides the environment's base URL (tests, proxies).
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub webhook_id: String,
}

impl PayPalSettings {
    pub fn base_url(&self) -> String {
        if let Some(base) = &self.api_base {
            return base.trim_end_matches('/').to_string();
        }
        if self.environment.eq_ignore_ascii_case("live") {
            "https://api-m.paypal.com".to_string()
        } else {
            "https://api-m.sandbox.paypal.com".to_string()
        }
    }
}

/// Rules of the agency block-and-pay-later flow.
#[derive(Debug, Deserialize, Clone)]
pub struct AgencyPolicy {
    #[serde(default = "default_window_days")]
    pub payment_window_days: i64,
    #[serde(default = "default_max_persons")]
    pub max_persons: u32,
    /// Return held seats to sale when a block lapses. Off by default: the
    /// agency keeps owing for the seats it blocked.
    #[serde(default)]
    pub release_seats_on_lapse: bool,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_window_days() -> i64 {
    15
}

fn default_max_persons() -> u32 {
    16
}

fn default_sweep_interval() -> u64 {
    3600
}

impl Default for AgencyPolicy {
    fn default() -> Self {
        Self {
            payment_window_days: default_window_days(),
            max_persons: default_max_persons(),
            release_seats_on_lapse: false,
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}
