//! HTTP endpoint handlers

pub mod metrics;
pub mod policy;
pub mod status;
