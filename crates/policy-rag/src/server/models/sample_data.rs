//! Built-in sample policy clauses and clause file loading

use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;
use std::path::Path;

use super::clause::PolicyClause;

const SAMPLE_POLICY_CLAUSES: &str = include_str!("../../../data/sample_policy_clauses.json");

/// The sample clause set shipped with the service
pub fn sample_policy_clauses() -> Result<Vec<PolicyClause>> {
  parse_clauses(SAMPLE_POLICY_CLAUSES).context("Built-in sample clauses are invalid")
}

/// Load clauses from a JSON file containing an array of clause objects
pub fn load_clauses_from_file(path: &Path) -> Result<Vec<PolicyClause>> {
  let contents = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read clause file {}", path.display()))?;
  parse_clauses(&contents).with_context(|| format!("Invalid clause file {}", path.display()))
}

/// Parse and validate a JSON clause array; ids must be unique
pub fn parse_clauses(json: &str) -> Result<Vec<PolicyClause>> {
  let clauses: Vec<PolicyClause> = serde_json::from_str(json)?;

  let mut seen = HashSet::new();
  for clause in &clauses {
    clause.validate()?;
    if !seen.insert(clause.clause_id.as_str()) {
      return Err(anyhow!("Duplicate clause id '{}'", clause.clause_id));
    }
  }

  Ok(clauses)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_sample_set_is_complete() {
    let clauses = sample_policy_clauses().unwrap();

    assert_eq!(clauses.len(), 11);
    assert_eq!(clauses[0].clause_id, "CLAUSE_001");
    assert_eq!(clauses[10].clause_id, "CLAUSE_011");
    assert!(clauses.iter().all(|c| c.policy_type.is_some() && c.section.is_some()));
  }

  #[test]
  fn test_duplicate_ids_rejected() {
    let json = r#"[
      {"clause_id": "A", "clause_text": "first"},
      {"clause_id": "A", "clause_text": "second"}
    ]"#;
    let err = parse_clauses(json).unwrap_err();
    assert!(err.to_string().contains("Duplicate clause id 'A'"));
  }

  #[test]
  fn test_load_from_file() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, r#"[{{"clause_id": "HOME_1", "clause_text": "Covers burst pipes."}}]"#)?;

    let clauses = load_clauses_from_file(file.path())?;
    assert_eq!(clauses, vec![PolicyClause::new("HOME_1", "Covers burst pipes.")]);
    Ok(())
  }

  #[test]
  fn test_missing_file_reports_path() {
    let err = load_clauses_from_file(Path::new("/nonexistent/clauses.json")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/clauses.json"));
  }
}
