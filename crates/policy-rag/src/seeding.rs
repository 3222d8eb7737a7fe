//! Loading policy clauses into the vector store

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use crate::config::{EmbeddingSettings, LoggingSettings, StoreSettings};
use crate::server::models::clause::{EmbeddedClause, PolicyClause};
use crate::server::models::sample_data::{load_clauses_from_file, sample_policy_clauses};
use crate::server::services::embeddings::{Embedder, OnnxEmbedder};
use crate::server::services::lancedb::LanceDbService;
use crate::server::services::vector_database::{check_embedding_dimension, VectorDatabase};

/// Clauses embedded per model call
const EMBED_BATCH_SIZE: usize = 16;

/// Seed the policy clause store
#[derive(Debug, Parser)]
#[command(name = "seed_policy_clauses", version, about)]
pub struct SeedArgs {
  /// JSON file holding an array of clauses; the built-in sample set when omitted
  #[arg(long)]
  pub file: Option<PathBuf>,

  /// Remove every stored clause before seeding
  #[arg(long)]
  pub reset: bool,

  #[command(flatten)]
  pub embedding: EmbeddingSettings,

  #[command(flatten)]
  pub store: StoreSettings,

  #[command(flatten)]
  pub logging: LoggingSettings,
}

/// Outcome of a seed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedReport {
  /// Clauses written by this run
  pub seeded: usize,
  /// Clauses stored after the run
  pub total: usize,
}

/// Clauses from `file`, or the built-in sample set
pub fn load_clauses(file: Option<&Path>) -> Result<Vec<PolicyClause>> {
  match file {
    Some(path) => load_clauses_from_file(path),
    None => sample_policy_clauses(),
  }
}

/// Embed `clauses` and write them to `store`, replacing clauses with the same id
pub async fn seed_clauses(
  embedder: &dyn Embedder,
  store: &dyn VectorDatabase,
  clauses: &[PolicyClause],
  reset: bool,
) -> Result<SeedReport> {
  if reset {
    store.clear().await.context("Failed to clear stored clauses")?;
    tracing::info!("Cleared existing clauses");
  } else {
    check_embedding_dimension(embedder, store).await?;
  }

  let mut seeded = 0;
  for batch in clauses.chunks(EMBED_BATCH_SIZE) {
    let texts: Vec<String> = batch.iter().map(|c| c.clause_text.clone()).collect();
    let embeddings = embedder.embed_batch(&texts).await.context("Failed to embed clauses")?;
    if embeddings.len() != batch.len() {
      return Err(anyhow!("Embedder returned {} vectors for {} clauses", embeddings.len(), batch.len()));
    }

    let embedded: Vec<EmbeddedClause> = batch
      .iter()
      .cloned()
      .zip(embeddings)
      .map(|(clause, embedding)| EmbeddedClause { clause, embedding })
      .collect();

    seeded += store.upsert_clauses(&embedded).await.context("Failed to store clauses")?;
    tracing::info!(seeded, of = clauses.len(), "Stored clause batch");
  }

  let total = store.count_clauses().await.context("Failed to count stored clauses")?;
  Ok(SeedReport { seeded, total })
}

/// Load the embedding model, open the store and seed it
#[cfg(not(tarpaulin_include))]
pub async fn run(args: &SeedArgs) -> Result<SeedReport> {
  let clauses = load_clauses(args.file.as_deref())?;
  tracing::info!(
    clauses = clauses.len(),
    source = %args.file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "built-in sample set".to_string()),
    "Seeding policy clauses"
  );

  let embedder = OnnxEmbedder::load(&args.embedding.source()).await?;
  let store = LanceDbService::new(&args.store.vector_db_path, &args.store.collection_name).await?;

  seed_clauses(&embedder, &store, &clauses, args.reset).await
}
