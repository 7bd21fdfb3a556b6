pub mod auth;

pub use auth::{optional_auth_middleware, staff_auth_middleware, Claims, Role};
