use serde::{Deserialize, Serialize};
use tortuga_shared::{parse_minor_units, MoneyError};
use uuid::Uuid;

/// Per-person prices of a tour, in minor units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TourPricing {
    pub adult_price_cents: i64,
    pub child_price_cents: i64,
}

impl TourPricing {
    pub fn new(adult_price_cents: i64, child_price_cents: i64) -> Self {
        Self {
            adult_price_cents,
            child_price_cents,
        }
    }

    /// Build pricing from decimal strings as entered in the operator panel.
    pub fn from_decimal(adult: &str, child: &str) -> Result<Self, MoneyError> {
        Ok(Self::new(parse_minor_units(adult)?, parse_minor_units(child)?))
    }

    /// Amount due for a party.
    pub fn quote(&self, adults: u32, children: u32) -> Result<i64, PricingError> {
        let adults_total = self
            .adult_price_cents
            .checked_mul(i64::from(adults))
            .ok_or(PricingError::Overflow)?;
        let children_total = self
            .child_price_cents
            .checked_mul(i64::from(children))
            .ok_or(PricingError::Overflow)?;
        adults_total
            .checked_add(children_total)
            .ok_or(PricingError::Overflow)
    }
}

/// A tour offering. Its scheduled instances are `Departure`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tour {
    pub id: Uuid,
    pub name: String,
    pub pricing: TourPricing,
}

impl Tour {
    pub fn new(name: impl Into<String>, pricing: TourPricing) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            pricing,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("Price calculation overflowed")]
    Overflow,
}
