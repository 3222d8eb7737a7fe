//! LanceDB-backed clause store

pub mod connection;
pub mod models;
pub mod records;
pub mod search;
pub mod table_manager;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::Path;

use self::connection::create_connection;
use self::models::ClauseRecord;
use self::records::last_record_per_id;
use self::search::search_similar_clauses;
use self::table_manager::TableManager;
use crate::server::models::clause::{ClauseMatch, EmbeddedClause};
use crate::server::services::vector_database::VectorDatabase;

/// Clause store persisted in a LanceDB directory
pub struct LanceDbService {
  table_manager: TableManager,
}

impl LanceDbService {
  /// Connect to (or create) the database at `data_dir`, using `table_name` for clauses
  pub async fn new(data_dir: &Path, table_name: &str) -> Result<Self> {
    let connection = create_connection(data_dir).await?;
    tracing::info!(path = %data_dir.display(), table = table_name, "Connected to LanceDB");

    Ok(Self { table_manager: TableManager::new(connection, table_name.to_string()) })
  }
}

#[async_trait]
impl VectorDatabase for LanceDbService {
  async fn upsert_clauses(&self, clauses: &[EmbeddedClause]) -> Result<usize> {
    for embedded in clauses {
      embedded.clause.validate()?;
    }
    let records = last_record_per_id(clauses.iter().map(ClauseRecord::from).collect());
    if records.len() < clauses.len() {
      tracing::warn!(
        duplicates = clauses.len() - records.len(),
        "Batch repeats clause ids, keeping the last of each"
      );
    }
    self.table_manager.upsert_records(&records).await
  }

  async fn search_similar(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<ClauseMatch>> {
    if limit == 0 {
      return Ok(Vec::new());
    }

    let Some(table) = self.table_manager.existing_table().await? else {
      tracing::warn!(table = self.table_manager.table_name(), "Clause table does not exist yet");
      return Ok(Vec::new());
    };

    if table.count_rows(None).await.map_err(|e| anyhow!("Failed to count clauses: {}", e))? == 0 {
      return Ok(Vec::new());
    }

    let dimension = self.table_manager.table_dimension(&table).await?;
    if query_embedding.len() != dimension {
      return Err(anyhow!(
        "Query embedding has {} dimensions but the clause table stores {}",
        query_embedding.len(),
        dimension
      ));
    }

    search_similar_clauses(&table, query_embedding, limit).await
  }

  async fn count_clauses(&self) -> Result<usize> {
    self.table_manager.count_rows().await
  }

  async fn clear(&self) -> Result<()> {
    self.table_manager.delete_all().await
  }

  async fn embedding_dimension(&self) -> Result<Option<usize>> {
    match self.table_manager.existing_table().await? {
      Some(table) => Ok(Some(self.table_manager.table_dimension(&table).await?)),
      None => Ok(None),
    }
  }
}
