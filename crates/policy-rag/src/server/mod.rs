//! REST server for policy clause search
//!
//! Uses axum for routing, schemars for request/response schemas and a
//! readiness-tracked service registry shared through axum state.

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routing;
pub mod services;
pub mod startup;
pub mod state;
pub mod types;
