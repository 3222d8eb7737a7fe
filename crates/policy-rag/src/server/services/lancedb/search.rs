//! Vector search operations and result processing for LanceDB

use anyhow::{anyhow, Result};
use arrow::record_batch::RecordBatch;
use futures::stream::StreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{DistanceType, Table};

use super::models::EMBEDDING_COLUMN;
use super::records::batch_to_matches;
use crate::server::models::clause::ClauseMatch;

/// Cosine nearest-neighbour search, best match first
pub async fn search_similar_clauses(
  table: &Table,
  query_embedding: &[f32],
  limit: usize,
) -> Result<Vec<ClauseMatch>> {
  let mut results_stream = create_search_query(table, query_embedding, limit).await?;
  let mut matches = process_all_batches(&mut results_stream).await?;

  // Batches may arrive out of order; the stream is only sorted within a batch
  matches.sort_by(|a, b| b.score.total_cmp(&a.score));
  matches.truncate(limit);

  if matches.is_empty() {
    tracing::debug!("No similar clauses found");
  }
  Ok(matches)
}

async fn create_search_query<'a>(
  table: &'a Table,
  query_embedding: &[f32],
  limit: usize,
) -> Result<impl futures::stream::Stream<Item = Result<RecordBatch, lancedb::Error>> + 'a> {
  let query = table
    .vector_search(query_embedding)?
    .column(EMBEDDING_COLUMN)
    .distance_type(DistanceType::Cosine)
    .limit(limit);

  query.execute().await.map_err(|e| anyhow!("Vector search failed: {}", e))
}

async fn process_all_batches(
  results_stream: &mut (impl futures::stream::Stream<Item = Result<RecordBatch, lancedb::Error>> + Unpin),
) -> Result<Vec<ClauseMatch>> {
  let mut matches = Vec::new();

  while let Some(batch_result) = results_stream.next().await {
    let batch = batch_result.map_err(|e| anyhow!("Error reading batch: {}", e))?;
    matches.extend(batch_to_matches(&batch)?);
  }

  Ok(matches)
}
