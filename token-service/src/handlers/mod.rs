pub mod auth;
pub mod health;

pub use auth::{login, logout, refresh, request_otp};
pub use health::health_check;
