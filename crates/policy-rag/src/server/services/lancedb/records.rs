//! Arrow RecordBatch conversion for clause records

use anyhow::{anyhow, Result};
use arrow::array::{Array, FixedSizeListArray, FixedSizeListBuilder, Float32Array, StringArray};
use arrow::array::builder::Float32Builder;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::collections::HashSet;
use std::sync::Arc;

use super::models::{
  ClauseRecord, CLAUSE_ID_COLUMN, CLAUSE_TEXT_COLUMN, CREATED_AT_COLUMN, DISTANCE_COLUMN,
  EMBEDDING_COLUMN, POLICY_TYPE_COLUMN, SECTION_COLUMN,
};
use crate::server::models::clause::{ClauseMatch, PolicyClause};

/// Arrow schema of the clause table for a given embedding dimension
pub fn clause_record_schema(embedding_dimension: usize) -> SchemaRef {
  Arc::new(Schema::new(vec![
    Field::new(CLAUSE_ID_COLUMN, DataType::Utf8, false),
    Field::new(CLAUSE_TEXT_COLUMN, DataType::Utf8, false),
    Field::new(POLICY_TYPE_COLUMN, DataType::Utf8, true),
    Field::new(SECTION_COLUMN, DataType::Utf8, true),
    Field::new(
      EMBEDDING_COLUMN,
      DataType::FixedSizeList(
        Arc::new(Field::new("item", DataType::Float32, true)),
        embedding_dimension as i32,
      ),
      false,
    ),
    Field::new(CREATED_AT_COLUMN, DataType::Utf8, false),
  ]))
}

/// Embedding dimension declared by a clause table schema
pub fn schema_embedding_dimension(schema: &Schema) -> Result<usize> {
  let field = schema
    .field_with_name(EMBEDDING_COLUMN)
    .map_err(|_| anyhow!("Table has no '{}' column", EMBEDDING_COLUMN))?;

  match field.data_type() {
    DataType::FixedSizeList(_, dimension) => Ok(*dimension as usize),
    other => Err(anyhow!("Column '{}' has unexpected type {}", EMBEDDING_COLUMN, other)),
  }
}

/// Check every record carries an embedding of the same, non-zero dimension
pub fn common_embedding_dimension(records: &[ClauseRecord]) -> Result<usize> {
  let first = records.first().ok_or_else(|| anyhow!("Cannot create RecordBatch from empty records"))?;
  let dimension = first.embedding.len();
  if dimension == 0 {
    return Err(anyhow!("Clause '{}' has an empty embedding", first.clause_id));
  }

  if let Some(mismatch) = records.iter().find(|r| r.embedding.len() != dimension) {
    return Err(anyhow!(
      "Clause '{}' has {} embedding dimensions, expected {}",
      mismatch.clause_id,
      mismatch.embedding.len(),
      dimension
    ));
  }

  Ok(dimension)
}

/// Keep only the last record for each clause id, in first-seen order of the survivors
pub fn last_record_per_id(records: Vec<ClauseRecord>) -> Vec<ClauseRecord> {
  let mut seen = HashSet::new();
  let mut latest: Vec<ClauseRecord> =
    records.into_iter().rev().filter(|r| seen.insert(r.clause_id.clone())).collect();
  latest.reverse();
  latest
}

/// Convert clause records to an Arrow RecordBatch
pub fn records_to_arrow_batch(records: &[ClauseRecord]) -> Result<RecordBatch> {
  let dimension = common_embedding_dimension(records)?;
  let schema = clause_record_schema(dimension);

  let columns: Vec<Arc<dyn Array>> = vec![
    Arc::new(required_strings(records, |r| &r.clause_id)),
    Arc::new(required_strings(records, |r| &r.clause_text)),
    Arc::new(optional_strings(records, |r| r.policy_type.as_deref())),
    Arc::new(optional_strings(records, |r| r.section.as_deref())),
    Arc::new(embedding_array(records, dimension)),
    Arc::new(required_strings(records, |r| &r.created_at)),
  ];

  RecordBatch::try_new(schema, columns).map_err(|e| anyhow!("Failed to create RecordBatch: {}", e))
}

fn required_strings<F>(records: &[ClauseRecord], field_fn: F) -> StringArray
where
  F: Fn(&ClauseRecord) -> &str,
{
  StringArray::from(records.iter().map(|r| Some(field_fn(r))).collect::<Vec<_>>())
}

fn optional_strings<F>(records: &[ClauseRecord], field_fn: F) -> StringArray
where
  F: Fn(&ClauseRecord) -> Option<&str>,
{
  StringArray::from(records.iter().map(field_fn).collect::<Vec<_>>())
}

fn embedding_array(records: &[ClauseRecord], dimension: usize) -> FixedSizeListArray {
  let mut builder: FixedSizeListBuilder<Float32Builder> =
    FixedSizeListBuilder::new(Float32Array::builder(dimension * records.len()), dimension as i32);

  for record in records {
    builder.values().append_slice(&record.embedding);
    builder.append(true);
  }

  builder.finish()
}

/// Borrowed column views over a search result batch
struct ResultColumns<'a> {
  clause_id: &'a StringArray,
  clause_text: &'a StringArray,
  policy_type: Option<&'a StringArray>,
  section: Option<&'a StringArray>,
  distance: Option<&'a Float32Array>,
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
  batch
    .column_by_name(name)
    .ok_or_else(|| anyhow!("Missing '{}' column", name))?
    .as_any()
    .downcast_ref::<StringArray>()
    .ok_or_else(|| anyhow!("Failed to cast '{}' column to StringArray", name))
}

fn optional_string_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a StringArray> {
  batch.column_by_name(name).and_then(|col| col.as_any().downcast_ref::<StringArray>())
}

fn optional_value(array: Option<&StringArray>, row: usize) -> Option<String> {
  array.filter(|a| !a.is_null(row)).map(|a| a.value(row).to_string()).filter(|v| !v.is_empty())
}

/// Cosine distance lies in [0, 2]; similarity is its complement
pub fn distance_to_score(distance: f32) -> f32 {
  1.0 - distance
}

/// Convert a search result batch into scored clauses
pub fn batch_to_matches(batch: &RecordBatch) -> Result<Vec<ClauseMatch>> {
  let columns = ResultColumns {
    clause_id: string_column(batch, CLAUSE_ID_COLUMN)?,
    clause_text: string_column(batch, CLAUSE_TEXT_COLUMN)?,
    policy_type: optional_string_column(batch, POLICY_TYPE_COLUMN),
    section: optional_string_column(batch, SECTION_COLUMN),
    distance: batch
      .column_by_name(DISTANCE_COLUMN)
      .and_then(|col| col.as_any().downcast_ref::<Float32Array>()),
  };

  let distances = columns.distance.ok_or_else(|| anyhow!("Missing '{}' column", DISTANCE_COLUMN))?;

  let matches = (0..batch.num_rows())
    .map(|row| ClauseMatch {
      clause: PolicyClause {
        clause_id: columns.clause_id.value(row).to_string(),
        clause_text: columns.clause_text.value(row).to_string(),
        policy_type: optional_value(columns.policy_type, row),
        section: optional_value(columns.section, row),
      },
      score: distance_to_score(distances.value(row)),
    })
    .collect();

  Ok(matches)
}
