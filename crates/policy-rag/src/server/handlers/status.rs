//! Status, version and schema endpoint handlers

use axum::{
  extract::{Extension, State},
  response::Json,
};
use schemars::{schema_for, JsonSchema};
use serde_json::{Map, Value};

use crate::server::middleware::RequestContext;
use crate::server::state::AppState;
use crate::server::types::{
  BaseResponse, DocsResponse, HealthResponse, PolicySearchRequest, PolicySearchResponse, RootResponse,
  VersionResponse,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// GET / - Service information and links
pub async fn root(
  State(state): State<AppState>,
  Extension(context): Extension<RequestContext>,
) -> Json<BaseResponse<RootResponse>> {
  let response = RootResponse {
    name: state.settings.app_name.clone(),
    version: VERSION.to_string(),
    status: "running".to_string(),
    docs: "/docs".to_string(),
    health: "/health".to_string(),
    metrics: "/metrics".to_string(),
  };

  Json(BaseResponse::success(response, context.request_id))
}

/// GET /health - Readiness of the models and the vector store
pub async fn health(
  State(state): State<AppState>,
  Extension(context): Extension<RequestContext>,
) -> Json<BaseResponse<HealthResponse>> {
  let status = if state.is_ready() { "healthy" } else { "degraded" };

  let response = HealthResponse {
    status: status.to_string(),
    version: VERSION.to_string(),
    model_loaded: state.embedder().is_some(),
    vector_store_ready: state.vector_db().is_some(),
    generator_loaded: state.generator().is_some(),
  };

  Json(BaseResponse::success(response, context.request_id))
}

/// GET /version - Returns current API version
pub async fn version(Extension(context): Extension<RequestContext>) -> Json<BaseResponse<VersionResponse>> {
  Json(BaseResponse::success(VersionResponse { version: VERSION.to_string() }, context.request_id))
}

fn schema_of<T: JsonSchema>() -> Value {
  serde_json::to_value(schema_for!(T)).unwrap_or_default()
}

/// GET /docs - JSON Schemas of the request and response bodies
pub async fn docs(Extension(context): Extension<RequestContext>) -> Json<BaseResponse<DocsResponse>> {
  let mut schemas = Map::new();
  schemas.insert("PolicySearchRequest".to_string(), schema_of::<PolicySearchRequest>());
  schemas.insert("PolicySearchResponse".to_string(), schema_of::<BaseResponse<PolicySearchResponse>>());
  schemas.insert("HealthResponse".to_string(), schema_of::<BaseResponse<HealthResponse>>());
  schemas.insert("RootResponse".to_string(), schema_of::<BaseResponse<RootResponse>>());
  schemas.insert("VersionResponse".to_string(), schema_of::<BaseResponse<VersionResponse>>());

  Json(BaseResponse::success(DocsResponse { schemas }, context.request_id))
}
