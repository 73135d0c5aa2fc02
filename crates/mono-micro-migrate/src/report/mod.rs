//! Run reporting: stage outcomes, per-entity results, run summary.
//!
//! Every pipeline stage emits a [`StageOutcome`] to the configured
//! [`ReportSink`] the moment it finishes, so an operator watching a long run
//! sees progress before the final [`RunReport`] lands.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Read all rows of the entity's record sets and edge queries.
    Extract,
    /// Structural checks before the transform may assume anything.
    ValidatePre,
    /// Id allocation, per-row mapping, and graph reconstruction.
    Transform,
    /// Record checks before anything touches the destination.
    ValidatePost,
    /// Clear-then-reload into the target collections.
    Load,
    /// Re-read the destination and verify it.
    ValidateIntegrity,
}

impl Stage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::ValidatePre => "validate_pre",
            Stage::Transform => "transform",
            Stage::ValidatePost => "validate_post",
            Stage::Load => "load",
            Stage::ValidateIntegrity => "validate_integrity",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a stage passed or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed,
}

/// What one stage did: counters, warnings, and the error if it failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Which stage this describes.
    pub stage: Stage,

    /// Final status.
    pub status: StageStatus,

    /// Named counters (rows extracted, records deleted/inserted per
    /// collection, links made).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counts: BTreeMap<String, i64>,

    /// Non-fatal observations (dropped edges, parentless nodes).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// The failure, if the stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock stage duration.
    pub duration_ms: u64,
}

impl StageOutcome {
    /// A passed stage with empty counters.
    pub fn passed(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Passed,
            counts: BTreeMap::new(),
            warnings: Vec::new(),
            error: None,
            duration_ms: 0,
        }
    }

    /// A failed stage carrying its error text.
    pub fn failed(stage: Stage, error: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            counts: BTreeMap::new(),
            warnings: Vec::new(),
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    /// Add a named counter.
    pub fn add_count(&mut self, key: impl Into<String>, value: i64) {
        self.counts.insert(key.into(), value);
    }

    /// Read a named counter, 0 if absent.
    #[must_use]
    pub fn count(&self, key: &str) -> i64 {
        self.counts.get(key).copied().unwrap_or(0)
    }
}

/// Terminal status of one entity's migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Excluded by the run's entity filter.
    NotAttempted,
    /// Failed before the destination was touched.
    FailedValidation,
    /// Failed while clearing or inserting.
    FailedLoad,
    /// Loaded, but the destination did not verify.
    FailedIntegrity,
    /// Migrated and verified.
    Succeeded,
}

impl EntityStatus {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, EntityStatus::Succeeded)
    }
}

/// The full result of one entity's pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityReport {
    /// Entity name.
    pub entity: String,

    /// Terminal status.
    pub status: EntityStatus,

    /// The stage that failed, when one did. All pre-load failures report
    /// the coarse status `failed_validation`; this field keeps the precise
    /// stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,

    /// The failure, if the entity failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Outcomes of every stage that ran, in order.
    pub stages: Vec<StageOutcome>,

    /// Wall-clock entity duration.
    pub duration_ms: u64,
}

impl EntityReport {
    /// A placeholder report for an entity the run never attempted.
    pub fn not_attempted(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            status: EntityStatus::NotAttempted,
            failed_stage: None,
            error: None,
            stages: Vec::new(),
            duration_ms: 0,
        }
    }

    /// The outcome of a specific stage, if it ran.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Result of a full migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA256 of the plan this run executed.
    pub plan_hash: String,

    /// Final status: "completed" or "failed".
    pub status: String,

    /// Conjunction of all attempted entities' success.
    pub success: bool,

    /// Whether the run stopped before touching any destination.
    pub dry_run: bool,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Entities in the plan.
    pub entities_total: usize,

    /// Entities migrated and verified.
    pub entities_succeeded: usize,

    /// Entities that failed at any stage.
    pub entities_failed: usize,

    /// Entities excluded by the filter.
    pub entities_skipped: usize,

    /// Records inserted across all collections.
    pub records_loaded: i64,

    /// Names of failed entities.
    pub failed_entities: Vec<String>,

    /// Per-entity detail, in execution order.
    pub entities: Vec<EntityReport>,
}

impl RunReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The report of a specific entity.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityReport> {
        self.entities.iter().find(|e| e.entity == name)
    }
}

/// Receives stage outcomes as they happen.
///
/// The engine reports through this seam only; persistence format and
/// destination are the implementation's business. Sinks must not fail the
/// run for transient trouble they can absorb, an error here fails the
/// entity's reporting but not its data.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Record one finished stage of one entity.
    async fn record(&self, entity: &str, outcome: &StageOutcome) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::ValidatePre.as_str(), "validate_pre");
        assert_eq!(Stage::ValidateIntegrity.to_string(), "validate_integrity");
    }

    #[test]
    fn test_outcome_counts() {
        let mut outcome = StageOutcome::passed(Stage::Load);
        outcome.add_count("deleted:users", 3);
        outcome.add_count("inserted:users", 5);

        assert_eq!(outcome.count("inserted:users"), 5);
        assert_eq!(outcome.count("absent"), 0);
    }

    #[test]
    fn test_report_serialization_shape() {
        let report = RunReport {
            run_id: "run-1".to_string(),
            plan_hash: "abc".to_string(),
            status: "completed".to_string(),
            success: true,
            dry_run: false,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            duration_seconds: 0.1,
            entities_total: 1,
            entities_succeeded: 1,
            entities_failed: 0,
            entities_skipped: 0,
            records_loaded: 7,
            failed_entities: Vec::new(),
            entities: vec![EntityReport {
                entity: "users".to_string(),
                status: EntityStatus::Succeeded,
                failed_stage: None,
                error: None,
                stages: vec![StageOutcome::passed(Stage::Extract)],
                duration_ms: 12,
            }],
        };

        let json = report.to_json().unwrap();
        assert!(json.contains("\"status\": \"completed\""));
        assert!(json.contains("\"succeeded\""));
        assert!(json.contains("\"extract\""));

        let parsed: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.entities[0].status, EntityStatus::Succeeded);
    }
}
