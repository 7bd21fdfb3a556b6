pub mod inventory;
pub mod tour;

pub use inventory::{Departure, InventoryError};
pub use tour::{PricingError, Tour, TourPricing};
