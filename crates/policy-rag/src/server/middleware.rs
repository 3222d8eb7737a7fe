//! Request context and middleware for the policy search API
//!
//! Every request gets an id that is attached to its log span, returned in the
//! `x-request-id` header and used as the response `transaction_id`.

use axum::{
  extract::{MatchedPath, Request, State},
  http::{HeaderValue, Method, Uri},
  middleware::Next,
  response::Response,
};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::server::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Endpoint label for requests that matched no route
const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Request metadata available to handlers through `Extension<RequestContext>`
#[derive(Debug, Clone)]
pub struct RequestContext {
  /// Unique ID for this request
  pub request_id: Uuid,
  pub method: Method,
  pub uri: Uri,
}

impl RequestContext {
  pub fn new(method: Method, uri: Uri) -> Self {
    Self { request_id: Uuid::new_v4(), method, uri }
  }
}

/// Attach a [`RequestContext`], log the request and record HTTP metrics
pub async fn request_context_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
  let context = RequestContext::new(request.method().clone(), request.uri().clone());
  let endpoint = request
    .extensions()
    .get::<MatchedPath>()
    .map(|path| path.as_str().to_string())
    .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string());

  let span = tracing::info_span!(
    "request",
    request_id = %context.request_id,
    method = %context.method,
    path = %context.uri.path(),
  );

  request.extensions_mut().insert(context.clone());

  async move {
    let _active = state.metrics.track_active();
    let start = Instant::now();
    tracing::debug!("Request started");

    let mut response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();
    state.metrics.observe_request(context.method.as_str(), &endpoint, status.as_u16(), elapsed);

    let duration_ms = elapsed.as_secs_f64() * 1000.0;
    if status.is_server_error() {
      tracing::error!(status = status.as_u16(), duration_ms, "Request failed");
    } else {
      tracing::info!(status = status.as_u16(), duration_ms, "Request completed");
    }

    if let Ok(value) = HeaderValue::from_str(&context.request_id.to_string()) {
      response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
  }
  .instrument(span)
  .await
}
