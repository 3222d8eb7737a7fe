//! Vector database abstraction for policy clause storage and retrieval
//!
//! The retrieval pipeline only talks to this trait, so the store backing it
//! (LanceDB today) can be swapped or mocked without touching the handlers.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::server::models::clause::{ClauseMatch, EmbeddedClause};
use crate::server::services::embeddings::Embedder;

/// Vector database interface for storing and searching clause embeddings
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorDatabase: Send + Sync {
  /// Insert clauses, replacing any stored clause with the same id.
  /// Returns the number of clauses written.
  async fn upsert_clauses(&self, clauses: &[EmbeddedClause]) -> Result<usize>;

  /// Nearest neighbours of `query_embedding`, best first, at most `limit` of them
  async fn search_similar(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<ClauseMatch>>;

  /// Number of stored clauses
  async fn count_clauses(&self) -> Result<usize>;

  /// Remove every stored clause
  async fn clear(&self) -> Result<()>;

  /// Embedding dimension of the stored clauses, `None` before the first write
  async fn embedding_dimension(&self) -> Result<Option<usize>>;
}

/// Fail when `store` already holds clauses embedded at a different dimension than `embedder` produces
pub async fn check_embedding_dimension(embedder: &dyn Embedder, store: &dyn VectorDatabase) -> Result<()> {
  let Some(stored) = store.embedding_dimension().await? else {
    return Ok(());
  };

  let produced = embedder.dimension();
  if stored != produced {
    return Err(anyhow!(
      "Stored clauses have {} embedding dimensions but the embedding model produces {}; reseed with --reset",
      stored,
      produced
    ));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::server::services::embeddings::MockEmbedder;

  fn embedder(dimension: usize) -> MockEmbedder {
    let mut embedder = MockEmbedder::new();
    embedder.expect_dimension().return_const(dimension);
    embedder
  }

  fn store(dimension: Option<usize>) -> MockVectorDatabase {
    let mut store = MockVectorDatabase::new();
    store.expect_embedding_dimension().returning(move || Ok(dimension));
    store
  }

  #[tokio::test]
  async fn test_empty_store_accepts_any_dimension() {
    assert!(check_embedding_dimension(&MockEmbedder::new(), &store(None)).await.is_ok());
  }

  #[tokio::test]
  async fn test_matching_dimension_accepted() {
    assert!(check_embedding_dimension(&embedder(384), &store(Some(384))).await.is_ok());
  }

  #[tokio::test]
  async fn test_mismatched_dimension_rejected() {
    let err = check_embedding_dimension(&embedder(768), &store(Some(384))).await.unwrap_err();
    assert!(err.to_string().contains("Stored clauses have 384 embedding dimensions but the embedding model produces 768"));
  }
}
