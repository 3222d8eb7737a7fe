//! Policy search endpoint handler

use axum::{
  extract::{rejection::JsonRejection, Extension, State},
  response::Json,
};
use chrono::Utc;
use std::time::Instant;

use crate::error::{ApiFailure, ServiceError};
use crate::server::middleware::RequestContext;
use crate::server::state::AppState;
use crate::server::types::{BaseResponse, PolicyClauseResult, PolicySearchRequest, PolicySearchResponse};

/// POST {prefix}/policy/search - Retrieve clauses relevant to a claim
pub async fn search_policies(
  State(state): State<AppState>,
  Extension(context): Extension<RequestContext>,
  payload: Result<Json<PolicySearchRequest>, JsonRejection>,
) -> Result<Json<BaseResponse<PolicySearchResponse>>, ApiFailure> {
  let start = Instant::now();
  let fail = |err: ServiceError| {
    if err.status_code().is_server_error() {
      tracing::error!(error = %err, key = %err.key(), "Policy search failed");
    } else {
      tracing::warn!(error = %err, key = %err.key(), "Policy search rejected");
    }
    err.into_api_failure(context.request_id)
  };

  let Json(request) = payload.map_err(|rejection| fail(rejection_error(rejection)))?;
  let query = request.validate(state.settings.max_results).map_err(fail)?;

  tracing::info!(
    query_length = query.claim_description.chars().count(),
    max_results = query.max_results,
    min_score = query.min_score,
    enable_rag = query.enable_rag,
    "Policy search requested"
  );

  let pipeline = state.pipeline().map_err(fail)?;
  let outcome = pipeline.run(&query).await.map_err(fail)?;

  let results: Vec<PolicyClauseResult> = outcome.matches.into_iter().map(PolicyClauseResult::from).collect();
  let search_time_ms = start.elapsed().as_secs_f64() * 1000.0;

  tracing::info!(
    results_count = results.len(),
    has_analysis = outcome.analysis.is_some(),
    search_time_ms,
    "Policy search completed"
  );

  let response = PolicySearchResponse {
    query: query.claim_description,
    total_results: results.len(),
    results,
    analysis: outcome.analysis,
    search_time_ms,
    timestamp: Utc::now(),
  };

  Ok(Json(BaseResponse::success(response, context.request_id)))
}

/// Well-formed JSON of the wrong shape is a validation failure; anything else is malformed
fn rejection_error(rejection: JsonRejection) -> ServiceError {
  match rejection {
    JsonRejection::JsonDataError(err) => ServiceError::validation("body", err.body_text()),
    other => ServiceError::MalformedRequest(other.body_text()),
  }
}

