//! Policy RAG - Claim-to-Clause Retrieval Service
//!
//! Retrieves the insurance policy clauses most relevant to a free-text claim
//! description and, on request, asks a local language model for an analysis
//! grounded in those clauses.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod seeding;
pub mod server;
