//! Row layout of the clause table

use chrono::Utc;

use crate::server::models::clause::EmbeddedClause;

pub const CLAUSE_ID_COLUMN: &str = "clause_id";
pub const CLAUSE_TEXT_COLUMN: &str = "clause_text";
pub const POLICY_TYPE_COLUMN: &str = "policy_type";
pub const SECTION_COLUMN: &str = "section";
pub const EMBEDDING_COLUMN: &str = "embedding";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const DISTANCE_COLUMN: &str = "_distance";

/// One stored clause
#[derive(Debug, Clone)]
pub struct ClauseRecord {
  pub clause_id: String,
  pub clause_text: String,
  pub policy_type: Option<String>,
  pub section: Option<String>,
  pub embedding: Vec<f32>,
  pub created_at: String,
}

impl From<&EmbeddedClause> for ClauseRecord {
  fn from(embedded: &EmbeddedClause) -> Self {
    Self {
      clause_id: embedded.clause.clause_id.clone(),
      clause_text: embedded.clause.clause_text.clone(),
      policy_type: embedded.clause.policy_type.clone(),
      section: embedded.clause.section.clone(),
      embedding: embedded.embedding.clone(),
      created_at: Utc::now().to_rfc3339(),
    }
  }
}
