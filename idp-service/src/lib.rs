//! Multi-tenant identity provider: domains, users, sessions and role-based authorization.

pub mod config;
pub mod dtos;
pub mod grpc;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod store;

pub use startup::AppState;
