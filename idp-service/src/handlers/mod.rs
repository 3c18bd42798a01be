//! HTTP handlers for idp-service.

pub mod admin;
pub mod health;
pub mod session;

pub use health::{health_check, index, metrics_handler, readiness_check};
