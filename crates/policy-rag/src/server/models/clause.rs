//! Policy clause domain types

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// A clause of an insurance policy, as supplied by the seeding tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyClause {
  pub clause_id: String,
  pub clause_text: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub policy_type: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub section: Option<String>,
}

impl PolicyClause {
  pub fn new(clause_id: impl Into<String>, clause_text: impl Into<String>) -> Self {
    Self {
      clause_id: clause_id.into(),
      clause_text: clause_text.into(),
      policy_type: None,
      section: None,
    }
  }

  pub fn with_metadata(mut self, policy_type: impl Into<String>, section: impl Into<String>) -> Self {
    self.policy_type = Some(policy_type.into());
    self.section = Some(section.into());
    self
  }

  /// Check the clause can be stored and later cited by id
  pub fn validate(&self) -> Result<()> {
    if self.clause_id.trim().is_empty() {
      return Err(anyhow!("Clause id must not be empty"));
    }
    if self.clause_id.contains('\'') {
      return Err(anyhow!("Clause id '{}' must not contain quotes", self.clause_id));
    }
    if self.clause_text.trim().is_empty() {
      return Err(anyhow!("Clause '{}' has no text", self.clause_id));
    }
    Ok(())
  }
}

/// A clause paired with its embedding, ready to be written to the vector store
#[derive(Debug, Clone)]
pub struct EmbeddedClause {
  pub clause: PolicyClause,
  pub embedding: Vec<f32>,
}

/// A clause returned by a similarity search
#[derive(Debug, Clone)]
pub struct ClauseMatch {
  pub clause: PolicyClause,
  /// `1 - cosine distance`; may fall outside [0, 1] for opposed vectors
  pub score: f32,
}

impl ClauseMatch {
  /// Score clamped into [0, 1] for reporting
  pub fn relevance_score(&self) -> f32 {
    self.score.clamp(0.0, 1.0)
  }
}
