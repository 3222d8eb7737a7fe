//! Table management operations for LanceDB

use anyhow::{anyhow, Result};
use arrow::record_batch::RecordBatchIterator;
use lancedb::{Connection, Table};

use super::models::{ClauseRecord, CLAUSE_ID_COLUMN};
use super::records::{common_embedding_dimension, records_to_arrow_batch, schema_embedding_dimension};

/// Table manager for the clause table
pub struct TableManager {
  connection: Connection,
  table_name: String,
}

impl TableManager {
  pub fn new(connection: Connection, table_name: String) -> Self {
    Self { connection, table_name }
  }

  pub fn table_name(&self) -> &str {
    &self.table_name
  }

  /// Check if the clause table exists
  pub async fn table_exists(&self) -> Result<bool> {
    let tables = self
      .connection
      .table_names()
      .execute()
      .await
      .map_err(|e| anyhow!("Failed to list tables: {}", e))?;
    Ok(tables.contains(&self.table_name))
  }

  /// Open the clause table
  pub async fn get_table(&self) -> Result<Table> {
    self
      .connection
      .open_table(&self.table_name)
      .execute()
      .await
      .map_err(|e| anyhow!("Failed to open table '{}': {}", self.table_name, e))
  }

  /// Open the clause table if it has been created
  pub async fn existing_table(&self) -> Result<Option<Table>> {
    if self.table_exists().await? {
      Ok(Some(self.get_table().await?))
    } else {
      Ok(None)
    }
  }

  /// Embedding dimension the stored table was created with
  pub async fn table_dimension(&self, table: &Table) -> Result<usize> {
    let schema = table.schema().await.map_err(|e| anyhow!("Failed to read table schema: {}", e))?;
    schema_embedding_dimension(&schema)
  }

  /// Write records, replacing stored rows that share a clause id.
  /// The table is created on first write.
  pub async fn upsert_records(&self, records: &[ClauseRecord]) -> Result<usize> {
    if records.is_empty() {
      return Ok(0);
    }

    match self.existing_table().await? {
      Some(table) => self.replace_in_existing_table(&table, records).await?,
      None => self.create_table_with_records(records).await?,
    }

    Ok(records.len())
  }

  async fn create_table_with_records(&self, records: &[ClauseRecord]) -> Result<()> {
    let batch = records_to_arrow_batch(records)?;
    let schema = batch.schema();
    let batch_iter = RecordBatchIterator::new(vec![Ok(batch)], schema);

    self
      .connection
      .create_table(&self.table_name, batch_iter)
      .execute()
      .await
      .map_err(|e| anyhow!("Failed to create table '{}': {}", self.table_name, e))?;

    tracing::info!(table = %self.table_name, clauses = records.len(), "Created clause table");
    Ok(())
  }

  /// Update rows whose clause id matches and insert the rest in one commit
  async fn replace_in_existing_table(&self, table: &Table, records: &[ClauseRecord]) -> Result<()> {
    let stored_dimension = self.table_dimension(table).await?;
    let incoming_dimension = common_embedding_dimension(records)?;
    if stored_dimension != incoming_dimension {
      return Err(anyhow!(
        "Embedding dimension {} does not match table '{}' dimension {}",
        incoming_dimension,
        self.table_name,
        stored_dimension
      ));
    }

    let batch = records_to_arrow_batch(records)?;
    let schema = batch.schema();
    let batch_iter = RecordBatchIterator::new(vec![Ok(batch)], schema);

    let mut merge = table.merge_insert(&[CLAUSE_ID_COLUMN]);
    merge.when_matched_update_all(None).when_not_matched_insert_all();
    merge
      .execute(Box::new(batch_iter))
      .await
      .map_err(|e| anyhow!("Failed to merge clauses into table '{}': {}", self.table_name, e))?;

    tracing::info!(table = %self.table_name, clauses = records.len(), "Stored clauses");
    Ok(())
  }

  /// Number of rows in the clause table, zero when it does not exist yet
  pub async fn count_rows(&self) -> Result<usize> {
    match self.existing_table().await? {
      Some(table) => table.count_rows(None).await.map_err(|e| anyhow!("Failed to count clauses: {}", e)),
      None => Ok(0),
    }
  }

  /// Delete every row of the clause table
  pub async fn delete_all(&self) -> Result<()> {
    if let Some(table) = self.existing_table().await? {
      table
        .delete(&format!("{} IS NOT NULL", CLAUSE_ID_COLUMN))
        .await
        .map_err(|e| anyhow!("Failed to clear clauses: {}", e))?;
      tracing::info!(table = %self.table_name, "Cleared clause table");
    }
    Ok(())
  }
}
