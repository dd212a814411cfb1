//! HTTP API server for the Vigil vote ledger.
//!
//! This crate provides:
//! - The vote toggle engine, the sole writer of aggregate counters
//! - Read-only vote queries
//! - Subject registration and removal
//! - Counter reconciliation (admin)
//! - Prometheus metrics and request tracing

pub mod engine;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod query;
pub mod routes;
pub mod state;
pub mod trace;

pub use engine::{ReconcileSummary, VoteToggleEngine};
pub use error::ApiError;
pub use query::VoteQueryService;
pub use routes::create_router;
pub use state::AppState;
pub use trace::TraceId;
