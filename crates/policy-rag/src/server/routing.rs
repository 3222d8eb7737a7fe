//! Axum router configuration for all endpoints

use axum::{
  middleware,
  routing::{get, post},
  Router,
};

use crate::server::handlers::{metrics, policy, status};
use crate::server::middleware::request_context_middleware;
use crate::server::state::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
  let search_route = state.settings.search_route();

  Router::new()
    // Status and version endpoints
    .route("/", get(status::root))
    .route("/health", get(status::health))
    .route("/version", get(status::version))
    .route("/docs", get(status::docs))
    .route("/metrics", get(metrics::metrics))
    // Policy search
    .route(&search_route, post(policy::search_policies))
    .layer(middleware::from_fn_with_state(state.clone(), request_context_middleware))
    .with_state(state)
}
