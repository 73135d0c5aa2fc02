//! Migration plan loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl MigrationPlan {
    /// Load a plan from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a plan from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let plan: MigrationPlan = serde_yaml::from_str(yaml)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Validate the plan structure.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the plan.
    ///
    /// Recorded in the run report so a report can be matched to the exact
    /// plan that produced it.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN_YAML: &str = r#"
entities:
  - name: users
    store: user-db
    id_strategy: preserve
    sets:
      - name: users
        query: select_users
        collection: users
  - name: placements
    store: placement-db
    id_strategy: generate_sequence
    depends_on: [users]
    sets:
      - name: placements
        query: select_placements
        collection: placements
    relations:
      - kind: tree
        set: placements
"#;

    #[test]
    fn test_from_yaml_round_trip() {
        let plan = MigrationPlan::from_yaml(PLAN_YAML).unwrap();
        assert_eq!(plan.entities.len(), 2);
        assert_eq!(plan.entities[0].id_strategy, IdStrategy::Preserve);
        assert_eq!(plan.entities[1].depends_on, vec!["users".to_string()]);
        assert_eq!(plan.entities[1].sets[0].id_column, "id");
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        let yaml = r#"
entities:
  - name: users
    store: user-db
    id_strategy: preserve
    sets: []
"#;
        assert!(MigrationPlan::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        std::fs::write(&path, PLAN_YAML).unwrap();

        let plan = MigrationPlan::load(&path).unwrap();
        assert_eq!(plan.entities.len(), 2);
    }

    #[test]
    fn test_hash_changes_with_plan() {
        let plan = MigrationPlan::from_yaml(PLAN_YAML).unwrap();
        let h1 = plan.hash();
        assert_eq!(h1.len(), 64);

        let mut changed = plan.clone();
        changed.entities[0].store = "other-db".to_string();
        assert_ne!(h1, changed.hash());
    }
}
