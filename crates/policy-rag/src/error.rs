//! Service error type and its HTTP mapping

use axum::{http::StatusCode, response::Json};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::server::types::{ApiError, BaseResponse};

/// Error body returned by every failing endpoint
pub type ApiFailure = (StatusCode, Json<BaseResponse<()>>);

#[derive(Error, Debug)]
pub enum ServiceError {
  #[error("Invalid value for '{field}': {message}")]
  Validation { field: String, message: String },

  #[error("Malformed request: {0}")]
  MalformedRequest(String),

  #[error("The {component} is not ready")]
  Unavailable { component: &'static str },

  #[error("Embedding failed: {0}")]
  Embedding(anyhow::Error),

  #[error("Vector search failed: {0}")]
  VectorSearch(anyhow::Error),

  #[error("Generation failed: {0}")]
  Generation(anyhow::Error),
}

impl ServiceError {
  pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Validation { field: field.into(), message: message.into() }
  }

  pub fn unavailable(component: &'static str) -> Self {
    Self::Unavailable { component }
  }

  pub fn status_code(&self) -> StatusCode {
    match self {
      Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
      Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
      Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
      Self::Embedding(_) | Self::VectorSearch(_) | Self::Generation(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }

  /// Unique key identifying the error source
  pub fn key(&self) -> String {
    match self {
      Self::Validation { .. } => "validation_failed".to_string(),
      Self::MalformedRequest(_) => "malformed_request".to_string(),
      Self::Unavailable { component } => format!("{}_unavailable", component.replace(' ', "_")),
      Self::Embedding(_) => "embedding_failed".to_string(),
      Self::VectorSearch(_) => "vector_search_failed".to_string(),
      Self::Generation(_) => "generation_failed".to_string(),
    }
  }

  /// Convert into the JSON error envelope, correlated with the request id
  pub fn into_api_failure(self, transaction_id: Uuid) -> ApiFailure {
    let status = self.status_code();
    let mut error = ApiError::new(&self.key(), &self.to_string());

    match &self {
      Self::Validation { field, .. } => error.context = json!({ "field": field }),
      Self::Embedding(source) | Self::VectorSearch(source) | Self::Generation(source) => {
        error.stack = source.chain().skip(1).map(|cause| cause.to_string()).collect();
      }
      _ => {}
    }

    (status, Json(BaseResponse::<()>::error(vec![error], transaction_id)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::anyhow;

  #[test]
  fn test_validation_maps_to_422_with_field_context() {
    let (status, Json(body)) =
      ServiceError::validation("min_score", "must be between 0 and 1").into_api_failure(Uuid::nil());

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body.errors.len(), 1);
    assert_eq!(body.errors[0].key, "validation_failed");
    assert_eq!(body.errors[0].context["field"], "min_score");
    assert_eq!(body.transaction_id, Uuid::nil());
  }

  #[test]
  fn test_downstream_failures_map_to_500() {
    let err = ServiceError::VectorSearch(anyhow!("io error").context("table scan failed"));
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.key(), "vector_search_failed");

    let (_, Json(body)) = err.into_api_failure(Uuid::new_v4());
    assert_eq!(body.errors[0].stack, vec!["io error".to_string()]);
  }

  #[test]
  fn test_unavailable_component_key() {
    let err = ServiceError::unavailable("language model");
    assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(err.key(), "language_model_unavailable");
    assert_eq!(err.to_string(), "The language model is not ready");
  }
}
