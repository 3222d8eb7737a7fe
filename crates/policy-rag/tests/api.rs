use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
  body::{to_bytes, Body},
  http::{header, Request, StatusCode},
  Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

use policy_rag::config::Settings;
use policy_rag::server::models::clause::{ClauseMatch, EmbeddedClause, PolicyClause};
use policy_rag::server::routing::create_router;
use policy_rag::server::services::embeddings::Embedder;
use policy_rag::server::services::generation::{TextGenerator, NO_CLAUSES_ANALYSIS};
use policy_rag::server::services::vector_database::VectorDatabase;
use policy_rag::server::state::AppState;

const SEARCH: &str = "/api/v1/policy/search";

struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
  async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
    Ok(vec![0.6, 0.8])
  }

  async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    Ok(texts.iter().map(|_| vec![0.6, 0.8]).collect())
  }

  fn dimension(&self) -> usize {
    2
  }
}

/// Returns its clauses in order, honouring the limit
struct FixedStore {
  matches: Vec<(&'static str, f32)>,
}

#[async_trait]
impl VectorDatabase for FixedStore {
  async fn upsert_clauses(&self, clauses: &[EmbeddedClause]) -> Result<usize> {
    Ok(clauses.len())
  }

  async fn search_similar(&self, _query_embedding: &[f32], limit: usize) -> Result<Vec<ClauseMatch>> {
    Ok(
      self
        .matches
        .iter()
        .take(limit)
        .map(|(id, score)| ClauseMatch {
          clause: PolicyClause::new(*id, format!("Policy text of {id}")).with_metadata("Auto Insurance", "Coverage"),
          score: *score,
        })
        .collect(),
    )
  }

  async fn count_clauses(&self) -> Result<usize> {
    Ok(self.matches.len())
  }

  async fn clear(&self) -> Result<()> {
    Ok(())
  }

  async fn embedding_dimension(&self) -> Result<Option<usize>> {
    Ok(None)
  }
}

struct FailingStore;

#[async_trait]
impl VectorDatabase for FailingStore {
  async fn upsert_clauses(&self, _clauses: &[EmbeddedClause]) -> Result<usize> {
    Err(anyhow!("read-only"))
  }

  async fn search_similar(&self, _query_embedding: &[f32], _limit: usize) -> Result<Vec<ClauseMatch>> {
    Err(anyhow!("lance file is corrupt"))
  }

  async fn count_clauses(&self) -> Result<usize> {
    Err(anyhow!("lance file is corrupt"))
  }

  async fn clear(&self) -> Result<()> {
    Ok(())
  }

  async fn embedding_dimension(&self) -> Result<Option<usize>> {
    Ok(None)
  }
}

#[derive(Default)]
struct CountingGenerator {
  calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for CountingGenerator {
  async fn generate_analysis(&self, _query: &str, clauses: &[ClauseMatch]) -> Result<String> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match clauses.first() {
      Some(best) => Ok(format!("Likely covered under [{}].", best.clause.clause_id)),
      None => Ok(NO_CLAUSES_ANALYSIS.to_string()),
    }
  }
}

fn sample_matches() -> Vec<(&'static str, f32)> {
  vec![("CLAUSE_001", 0.92), ("CLAUSE_004", 0.71), ("CLAUSE_002", 0.48), ("CLAUSE_009", 0.15)]
}

fn empty_state() -> AppState {
  AppState::new(Settings::from_args(["policy_rag_server"]).unwrap()).unwrap()
}

fn ready_state() -> AppState {
  let state = empty_state();
  state.install_embedder(Arc::new(FixedEmbedder));
  state.install_vector_db(Arc::new(FixedStore { matches: sample_matches() }));
  state
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
  let response = app.oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
  (status, body)
}

async fn get(state: &AppState, uri: &str) -> (StatusCode, Value) {
  let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
  send(create_router(state.clone()), request).await
}

async fn search(state: &AppState, body: Value) -> (StatusCode, Value) {
  let request = Request::builder()
    .method("POST")
    .uri(SEARCH)
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from(body.to_string()))
    .unwrap();
  send(create_router(state.clone()), request).await
}

fn result_ids(body: &Value) -> Vec<String> {
  body["results"]
    .as_array()
    .unwrap()
    .iter()
    .map(|r| r["clause_id"].as_str().unwrap().to_string())
    .collect()
}

#[tokio::test]
async fn test_health_degraded_until_services_load() {
  let (status, body) = get(&empty_state(), "/health").await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "degraded");
  assert_eq!(body["model_loaded"], false);
  assert_eq!(body["vector_store_ready"], false);
  assert_eq!(body["generator_loaded"], false);
}

#[tokio::test]
async fn test_health_reflects_partial_readiness() {
  let state = empty_state();
  state.install_vector_db(Arc::new(FixedStore { matches: Vec::new() }));

  let (_, body) = get(&state, "/health").await;
  assert_eq!(body["status"], "degraded");
  assert_eq!(body["model_loaded"], false);
  assert_eq!(body["vector_store_ready"], true);
}

#[tokio::test]
async fn test_health_healthy_without_generator() {
  let (status, body) = get(&ready_state(), "/health").await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "healthy");
  assert_eq!(body["model_loaded"], true);
  assert_eq!(body["vector_store_ready"], true);
  assert_eq!(body["generator_loaded"], false);
  assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_root_lists_service_links() {
  let (status, body) = get(&empty_state(), "/").await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["name"], "Policy Intelligence API");
  assert_eq!(body["status"], "running");
  assert_eq!(body["docs"], "/docs");
  assert_eq!(body["health"], "/health");
  assert_eq!(body["metrics"], "/metrics");
  assert!(body["versioning"]["latest"].is_string());
}

#[tokio::test]
async fn test_version_and_docs() {
  let state = empty_state();

  let (_, body) = get(&state, "/version").await;
  assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

  let (status, body) = get(&state, "/docs").await;
  assert_eq!(status, StatusCode::OK);
  let request_schema = &body["schemas"]["PolicySearchRequest"];
  assert!(request_schema["properties"]["claim_description"].is_object());
  assert!(body["schemas"]["PolicySearchResponse"].is_object());
}

#[tokio::test]
async fn test_transaction_id_matches_request_id_header() {
  let request = Request::builder().uri("/version").body(Body::empty()).unwrap();
  let response = create_router(empty_state()).oneshot(request).await.unwrap();

  let header_id = response.headers().get("x-request-id").unwrap().to_str().unwrap().to_string();
  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let body: Value = serde_json::from_slice(&bytes).unwrap();
  assert_eq!(body["transaction_id"], header_id);
}

#[tokio::test]
async fn test_search_returns_ranked_clauses() {
  let (status, body) = search(&ready_state(), json!({"claim_description": "Rear-ended at a red light"})).await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["query"], "Rear-ended at a red light");
  assert_eq!(result_ids(&body), vec!["CLAUSE_001", "CLAUSE_004", "CLAUSE_002", "CLAUSE_009"]);
  assert_eq!(body["total_results"], 4);
  assert_eq!(body["results"][0]["policy_type"], "Auto Insurance");
  assert_eq!(body["results"][0]["section"], "Coverage");
  assert!((body["results"][0]["relevance_score"].as_f64().unwrap() - 0.92).abs() < 1e-6);
  assert!(body["search_time_ms"].as_f64().unwrap() >= 0.0);
  assert!(body["timestamp"].is_string());
  assert!(body.get("analysis").is_none());
  assert!(body.get("errors").is_none());
}

#[tokio::test]
async fn test_min_score_filters_results() {
  let (status, body) = search(
    &ready_state(),
    json!({"claim_description": "Rear-ended at a red light", "min_score": 0.5}),
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(result_ids(&body), vec!["CLAUSE_001", "CLAUSE_004"]);
  assert_eq!(body["total_results"], 2);
}

#[tokio::test]
async fn test_min_score_can_filter_everything() {
  let (status, body) = search(
    &ready_state(),
    json!({"claim_description": "Rear-ended at a red light", "min_score": 0.99}),
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert!(result_ids(&body).is_empty());
  assert_eq!(body["total_results"], 0);
}

#[tokio::test]
async fn test_max_results_bounds_results() {
  let (_, body) = search(
    &ready_state(),
    json!({"claim_description": "Rear-ended at a red light", "max_results": 2}),
  )
  .await;

  assert_eq!(result_ids(&body), vec!["CLAUSE_001", "CLAUSE_004"]);
}

#[tokio::test]
async fn test_integral_float_max_results_accepted() {
  let (status, body) = search(
    &ready_state(),
    json!({"claim_description": "Rear-ended at a red light", "max_results": 2.0}),
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(result_ids(&body), vec!["CLAUSE_001", "CLAUSE_004"]);
}

#[tokio::test]
async fn test_rag_adds_analysis_when_enabled() {
  let state = ready_state();
  let generator = Arc::new(CountingGenerator::default());
  state.install_generator(generator.clone());

  let (status, body) = search(
    &state,
    json!({"claim_description": "Hail dented the roof of my car", "isEnableRag": true}),
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["analysis"], "Likely covered under [CLAUSE_001].");
  assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rag_disabled_omits_analysis() {
  let state = ready_state();
  let generator = Arc::new(CountingGenerator::default());
  state.install_generator(generator.clone());

  let (status, body) = search(
    &state,
    json!({"claim_description": "Hail dented the roof of my car", "is_enable_rag": false}),
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert!(body.get("analysis").is_none());
  assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rag_without_generator_is_unavailable() {
  let (status, body) = search(
    &ready_state(),
    json!({"claim_description": "Hail dented the roof of my car", "is_enable_rag": true}),
  )
  .await;

  assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
  assert_eq!(body["errors"][0]["key"], "language_model_unavailable");
}

#[tokio::test]
async fn test_search_before_models_load_is_unavailable() {
  let (status, body) = search(&empty_state(), json!({"claim_description": "Rear-ended at a red light"})).await;

  assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
  assert_eq!(body["errors"][0]["key"], "embedding_model_unavailable");
  assert!(body["transaction_id"].is_string());
}

#[tokio::test]
async fn test_validation_failures_return_422_with_field() {
  let state = ready_state();
  let cases = [
    (json!({"claim_description": "too short"}), "claim_description"),
    (json!({"claim_description": "a".repeat(5001)}), "claim_description"),
    (json!({"claim_description": "Rear-ended at a red light", "max_results": 0}), "max_results"),
    (json!({"claim_description": "Rear-ended at a red light", "max_results": 51}), "max_results"),
    (json!({"claim_description": "Rear-ended at a red light", "min_score": 1.5}), "min_score"),
    (json!({"claim_description": "Rear-ended at a red light", "min_score": -0.1}), "min_score"),
    (json!({"claim_description": "Rear-ended at a red light", "max_results": -1}), "max_results"),
    (json!({"claim_description": "Rear-ended at a red light", "max_results": 1e30}), "max_results"),
    (json!({"claim_description": "Rear-ended at a red light", "max_results": 2.5}), "max_results"),
    (json!({"claim_description": "Rear-ended at a red light", "min_score": "high"}), "min_score"),
  ];

  for (body, field) in cases {
    let (status, response) = search(&state, body).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "field {field}");
    assert_eq!(response["errors"][0]["key"], "validation_failed");
    assert_eq!(response["errors"][0]["context"]["field"], field);
  }
}

#[tokio::test]
async fn test_missing_claim_description_is_422() {
  let (status, body) = search(&ready_state(), json!({"max_results": 5})).await;

  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(body["errors"][0]["key"], "validation_failed");
}

#[tokio::test]
async fn test_malformed_json_is_400() {
  let request = Request::builder()
    .method("POST")
    .uri(SEARCH)
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from("{\"claim_description\": "))
    .unwrap();

  let (status, body) = send(create_router(ready_state()), request).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["errors"][0]["key"], "malformed_request");
}

#[tokio::test]
async fn test_store_failure_is_500() {
  let state = empty_state();
  state.install_embedder(Arc::new(FixedEmbedder));
  state.install_vector_db(Arc::new(FailingStore));

  let (status, body) = search(&state, json!({"claim_description": "Rear-ended at a red light"})).await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(body["errors"][0]["key"], "vector_search_failed");
}

#[tokio::test]
async fn test_metrics_record_requests_and_stages() {
  let state = ready_state();
  search(&state, json!({"claim_description": "Rear-ended at a red light"})).await;

  let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
  let response = create_router(state).oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert!(response.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/plain"));

  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let text = String::from_utf8(bytes.to_vec()).unwrap();

  let search_line = text
    .lines()
    .find(|line| line.starts_with("http_requests_total{") && line.contains(SEARCH))
    .expect("search request counted");
  assert!(search_line.contains("method=\"POST\""));
  assert!(search_line.contains("status_code=\"200\""));
  assert!(search_line.ends_with(" 1"));

  assert!(text.contains("embedding_operations_total 1"));
  assert!(text.contains("vector_search_operations_total 1"));
  assert!(text.contains("http_request_duration_seconds_bucket"));
  assert!(text.contains("active_requests"));
}
