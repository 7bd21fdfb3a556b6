pub mod models;
pub mod money;
pub mod pii;

pub use money::{format_minor_units, parse_minor_units, MoneyError};
pub use pii::Masked;
