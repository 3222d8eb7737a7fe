//! REST API types with schemars annotations for schema generation

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::server::models::clause::ClauseMatch;

pub const MIN_CLAIM_CHARS: usize = 10;
pub const MAX_CLAIM_CHARS: usize = 5000;
pub const MAX_RESULTS_LIMIT: usize = 50;

// Base Response Structure
// ======================

/// Base response object for all API endpoints
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct BaseResponse<T> {
  /// API versioning information
  pub versioning: VersionInfo,

  /// Transaction ID for logging correlation
  pub transaction_id: Uuid,

  /// Optional error information
  #[serde(skip_serializing_if = "Vec::is_empty", default)]
  pub errors: Vec<ApiError>,

  /// Response data (generic for different endpoint types)
  #[serde(flatten)]
  pub data: T,
}

/// API versioning information
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct VersionInfo {
  pub latest: String,
  pub requested: String,
  pub resolved: String,
}

/// API error information
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ApiError {
  /// Error key, unique to the error source
  pub key: String,

  /// Human readable error message
  pub message: String,

  /// Underlying causes, outermost first
  #[serde(default)]
  pub stack: Vec<String>,

  /// Additional error context
  #[serde(default)]
  pub context: serde_json::Value,
}

// Status Endpoints
// ================

/// Response for /health
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
  /// "healthy" when the embedding model and vector store are ready, "degraded" otherwise
  pub status: String,
  pub version: String,
  /// Whether the embedding model is loaded
  pub model_loaded: bool,
  /// Whether the vector store is connected
  pub vector_store_ready: bool,
  /// Whether the language model is loaded
  pub generator_loaded: bool,
}

/// Response for /
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RootResponse {
  pub name: String,
  pub version: String,
  pub status: String,
  pub docs: String,
  pub health: String,
  pub metrics: String,
}

/// Response for /version
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct VersionResponse {
  pub version: String,
}

/// Response for /docs
#[derive(Debug, Serialize)]
pub struct DocsResponse {
  /// JSON Schema per request/response body, keyed by type name
  pub schemas: serde_json::Map<String, serde_json::Value>,
}

// Policy Search
// =============

/// Request for the policy search endpoint
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PolicySearchRequest {
  /// Description of the insurance claim
  pub claim_description: String,

  /// Maximum number of results to return (1-50)
  #[serde(default)]
  #[schemars(with = "Option<u32>")]
  pub max_results: Option<Value>,

  /// Minimum relevance score threshold (0-1)
  #[serde(default)]
  #[schemars(with = "Option<f32>")]
  pub min_score: Option<Value>,

  /// Whether to generate an analysis of the claim against retrieved clauses
  #[serde(default, alias = "isEnableRag")]
  pub is_enable_rag: Option<bool>,
}

/// A search request that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
  pub claim_description: String,
  pub max_results: usize,
  pub min_score: f32,
  pub enable_rag: bool,
}

impl PolicySearchRequest {
  /// Apply defaults and check every bound
  pub fn validate(self, default_max_results: usize) -> Result<SearchQuery, ServiceError> {
    let length = self.claim_description.chars().count();
    if length < MIN_CLAIM_CHARS {
      return Err(ServiceError::validation(
        "claim_description",
        format!("must be at least {MIN_CLAIM_CHARS} characters, got {length}"),
      ));
    }
    if length > MAX_CLAIM_CHARS {
      return Err(ServiceError::validation(
        "claim_description",
        format!("must be at most {MAX_CLAIM_CHARS} characters, got {length}"),
      ));
    }

    let max_results = match &self.max_results {
      Some(value) => {
        let requested = numeric_field("max_results", value)?;
        if requested.fract() != 0.0 {
          return Err(ServiceError::validation("max_results", format!("must be a whole number, got {requested}")));
        }
        requested
      }
      None => default_max_results as f64,
    };
    if !(1.0..=MAX_RESULTS_LIMIT as f64).contains(&max_results) {
      return Err(ServiceError::validation(
        "max_results",
        format!("must be between 1 and {MAX_RESULTS_LIMIT}, got {max_results}"),
      ));
    }

    let min_score = match &self.min_score {
      Some(value) => numeric_field("min_score", value)?,
      None => 0.0,
    };
    if !(0.0..=1.0).contains(&min_score) {
      return Err(ServiceError::validation(
        "min_score",
        format!("must be between 0 and 1, got {min_score}"),
      ));
    }

    Ok(SearchQuery {
      claim_description: self.claim_description,
      max_results: max_results as usize,
      min_score: min_score as f32,
      enable_rag: self.is_enable_rag.unwrap_or(false),
    })
  }
}

/// Finite number given as a JSON number or a numeric string
fn numeric_field(field: &str, value: &Value) -> Result<f64, ServiceError> {
  let number = match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse::<f64>().ok(),
    _ => None,
  };

  number
    .filter(|n| n.is_finite())
    .ok_or_else(|| ServiceError::validation(field, format!("must be a number, got {value}")))
}

/// A retrieved policy clause
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PolicyClauseResult {
  pub clause_id: String,
  pub clause_text: String,
  pub policy_type: Option<String>,
  pub section: Option<String>,
  /// Relevance score (0-1)
  pub relevance_score: f32,
}

impl From<ClauseMatch> for PolicyClauseResult {
  fn from(matched: ClauseMatch) -> Self {
    let relevance_score = matched.relevance_score();
    Self {
      clause_id: matched.clause.clause_id,
      clause_text: matched.clause.clause_text,
      policy_type: matched.clause.policy_type,
      section: matched.clause.section,
      relevance_score,
    }
  }
}

/// Response for the policy search endpoint
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PolicySearchResponse {
  /// The submitted claim description
  pub query: String,

  /// Relevant policy clauses, most relevant first
  pub results: Vec<PolicyClauseResult>,

  /// Generated analysis, present only when requested and clauses were found
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub analysis: Option<String>,

  pub total_results: usize,

  /// Wall time spent serving the search
  pub search_time_ms: f64,

  pub timestamp: DateTime<Utc>,
}

// Helper Functions
// ================

fn current_version_info() -> VersionInfo {
  let version = env!("CARGO_PKG_VERSION");
  VersionInfo {
    latest: version.to_string(),
    requested: version.to_string(),
    resolved: version.to_string(),
  }
}

impl<T> BaseResponse<T> {
  /// Create a successful response
  pub fn success(data: T, transaction_id: Uuid) -> Self {
    Self { versioning: current_version_info(), transaction_id, errors: Vec::new(), data }
  }

  /// Create an error response
  pub fn error(errors: Vec<ApiError>, transaction_id: Uuid) -> BaseResponse<()> {
    BaseResponse { versioning: current_version_info(), transaction_id, errors, data: () }
  }
}

impl ApiError {
  /// Create a new API error
  pub fn new(key: &str, message: &str) -> Self {
    Self {
      key: key.to_string(),
      message: message.to_string(),
      stack: Vec::new(),
      context: serde_json::Value::Null,
    }
  }
}
