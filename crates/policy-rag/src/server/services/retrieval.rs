//! Embed, search, filter and optionally generate

use std::sync::Arc;
use std::time::Instant;

use crate::error::ServiceError;
use crate::metrics::{Metrics, Stage};
use crate::server::models::clause::ClauseMatch;
use crate::server::services::embeddings::Embedder;
use crate::server::services::generation::TextGenerator;
use crate::server::services::vector_database::VectorDatabase;
use crate::server::types::SearchQuery;

/// What a search produced
#[derive(Debug)]
pub struct PipelineOutcome {
  /// Matches at or above the score threshold, best first
  pub matches: Vec<ClauseMatch>,
  /// Present only when generation was requested and something matched
  pub analysis: Option<String>,
}

/// The services one search runs through
pub struct RetrievalPipeline {
  embedder: Arc<dyn Embedder>,
  store: Arc<dyn VectorDatabase>,
  generator: Option<Arc<dyn TextGenerator>>,
  metrics: Arc<Metrics>,
}

impl RetrievalPipeline {
  pub fn new(
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorDatabase>,
    generator: Option<Arc<dyn TextGenerator>>,
    metrics: Arc<Metrics>,
  ) -> Self {
    Self { embedder, store, generator, metrics }
  }

  pub async fn run(&self, query: &SearchQuery) -> Result<PipelineOutcome, ServiceError> {
    let generator = match (query.enable_rag, &self.generator) {
      (true, None) => return Err(ServiceError::unavailable("language model")),
      (true, Some(generator)) => Some(generator),
      (false, _) => None,
    };

    let embedding = self.embed(&query.claim_description).await?;
    let candidates = self.search(&embedding, query.max_results).await?;
    let candidate_count = candidates.len();
    let best_score = candidates.first().map(|m| m.score);

    let matches = apply_score_threshold(candidates, query.min_score, query.max_results);
    if matches.is_empty() && candidate_count > 0 {
      tracing::info!(
        candidates = candidate_count,
        best_score = best_score.unwrap_or_default(),
        min_score = query.min_score,
        "All matches fell below the score threshold"
      );
    }

    let analysis = match generator {
      Some(generator) if !matches.is_empty() => {
        Some(self.generate(generator.as_ref(), &query.claim_description, &matches).await?)
      }
      _ => None,
    };

    Ok(PipelineOutcome { matches, analysis })
  }

  async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
    let start = Instant::now();
    let result = self.embedder.embed(text).await;
    self.metrics.observe_stage(Stage::Embedding, start.elapsed(), result.is_ok());

    let embedding = result.map_err(ServiceError::Embedding)?;
    tracing::debug!(dimension = embedding.len(), elapsed_ms = start.elapsed().as_millis() as u64, "Embedded claim");
    Ok(embedding)
  }

  async fn search(&self, embedding: &[f32], limit: usize) -> Result<Vec<ClauseMatch>, ServiceError> {
    let start = Instant::now();
    let result = self.store.search_similar(embedding, limit).await;
    self.metrics.observe_stage(Stage::VectorSearch, start.elapsed(), result.is_ok());

    let matches = result.map_err(ServiceError::VectorSearch)?;
    tracing::debug!(candidates = matches.len(), elapsed_ms = start.elapsed().as_millis() as u64, "Vector search finished");
    Ok(matches)
  }

  async fn generate(
    &self,
    generator: &dyn TextGenerator,
    query: &str,
    matches: &[ClauseMatch],
  ) -> Result<String, ServiceError> {
    let start = Instant::now();
    let result = generator.generate_analysis(query, matches).await;
    self.metrics.observe_stage(Stage::Generation, start.elapsed(), result.is_ok());

    let analysis = result.map_err(ServiceError::Generation)?;
    tracing::debug!(analysis_chars = analysis.len(), elapsed_ms = start.elapsed().as_millis() as u64, "Generated analysis");
    Ok(analysis)
  }
}

/// Keep matches scoring at least `min_score`, best first, at most `max_results`
pub fn apply_score_threshold(mut matches: Vec<ClauseMatch>, min_score: f32, max_results: usize) -> Vec<ClauseMatch> {
  matches.retain(|m| m.score >= min_score);
  matches.sort_by(|a, b| b.score.total_cmp(&a.score));
  matches.truncate(max_results);
  matches
}
