//! Prometheus scrape endpoint

use axum::{
  extract::{Extension, State},
  http::{header, StatusCode},
  response::{IntoResponse, Json, Response},
};

use crate::error::ApiFailure;
use crate::server::middleware::RequestContext;
use crate::server::state::AppState;
use crate::server::types::{ApiError, BaseResponse};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics - Prometheus text exposition
pub async fn metrics(
  State(state): State<AppState>,
  Extension(context): Extension<RequestContext>,
) -> Result<Response, ApiFailure> {
  match state.metrics.render() {
    Ok(body) => Ok(([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response()),
    Err(e) => {
      tracing::error!(error = %e, "Failed to render metrics");
      let error = ApiError::new("metrics_encoding_failed", &e.to_string());
      Err((StatusCode::INTERNAL_SERVER_ERROR, Json(BaseResponse::<()>::error(vec![error], context.request_id))))
    }
  }
}
