//! HTTP request handlers, one module per resource.

pub mod health;
pub mod payments;
pub mod reservations;
pub mod webhooks;
pub mod websocket;

pub use health::{health_check, readiness_check};
