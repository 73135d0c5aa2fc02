//! Run orchestration.
//!
//! The [`MigrationRunner`] owns the registries (target writers by store,
//! mappers by entity, report sinks), derives the execution order from the
//! plan's dependency edges, and runs one [`EntityPipeline`] per attempted
//! entity. Entity outcomes stay loosely coupled: a failed entity never
//! cancels the entities after it, their own pre-validation decides.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MigrationPlan;
use crate::core::{IdentitySource, SourceReader, TargetWriter};
use crate::error::{MigrateError, Result};
use crate::pipeline::{EntityMapper, EntityPipeline, RunContext};
use crate::report::{EntityReport, EntityStatus, ReportSink, RunReport, Stage};
use crate::stores::NullIdentitySource;

/// Options for one runner invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run only the named entities. Empty runs the whole plan. Dependencies
    /// of a named entity are not pulled in; the entity's own pre-validation
    /// probes whether they are already migrated.
    pub only: Vec<String>,

    /// Validate everything, write nothing. Every attempted entity stops
    /// after post-transform validation.
    pub dry_run: bool,
}

/// Executes a migration plan against registered stores.
pub struct MigrationRunner {
    plan: MigrationPlan,
    source: Arc<dyn SourceReader>,
    targets: HashMap<String, Arc<dyn TargetWriter>>,
    mappers: HashMap<String, Arc<dyn EntityMapper>>,
    identities: Arc<dyn IdentitySource>,
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl MigrationRunner {
    /// Create a runner for a validated plan and a source reader.
    pub fn new(plan: MigrationPlan, source: Arc<dyn SourceReader>) -> Self {
        Self {
            plan,
            source,
            targets: HashMap::new(),
            mappers: HashMap::new(),
            identities: Arc::new(NullIdentitySource),
            sinks: Vec::new(),
        }
    }

    /// Register the target writer for a store name used in the plan.
    pub fn with_target(mut self, store: impl Into<String>, writer: Arc<dyn TargetWriter>) -> Self {
        self.targets.insert(store.into(), writer);
        self
    }

    /// Register an entity's mapper. Keyed by the mapper's own entity name.
    pub fn with_mapper(mut self, mapper: Arc<dyn EntityMapper>) -> Self {
        self.mappers.insert(mapper.entity().to_string(), mapper);
        self
    }

    /// Set the identity source mappers resolve natural keys against.
    pub fn with_identity_source(mut self, identities: Arc<dyn IdentitySource>) -> Self {
        self.identities = identities;
        self
    }

    /// Add a report sink. Sinks receive every stage outcome as it happens.
    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Run the plan.
    ///
    /// Returns `Err` only for configuration problems found before the
    /// first entity starts; entity failures are folded into the report.
    pub async fn run(&self, options: RunOptions) -> Result<RunReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();

        let attempted = self.attempted_entities(&options)?;
        self.check_registrations(&attempted)?;
        let order = self.execution_order();

        info!(
            "Starting migration run {} ({} of {} entities{})",
            run_id,
            attempted.len(),
            self.plan.entities.len(),
            if options.dry_run { ", dry run" } else { "" }
        );

        let mut ctx = RunContext::new(run_id.clone(), Arc::clone(&self.identities));
        let mut reports: Vec<EntityReport> = Vec::new();

        for name in &order {
            if !attempted.contains(name.as_str()) {
                ctx.mark_status(name, EntityStatus::NotAttempted);
                reports.push(EntityReport::not_attempted(name.clone()));
                continue;
            }
            // Both lookups were checked upfront; a miss here is a bug.
            let spec = self.plan.entity(name).ok_or_else(|| {
                MigrateError::Config(format!("entity '{name}' disappeared from the plan"))
            })?;
            let mapper = self.mappers.get(name).ok_or_else(|| {
                MigrateError::Config(format!("no mapper registered for entity '{name}'"))
            })?;

            let pipeline = EntityPipeline::new(
                spec,
                &self.plan,
                Arc::clone(&self.source),
                &self.targets,
                Arc::clone(mapper),
                &self.sinks,
                options.dry_run,
            );
            let report = pipeline.run(&mut ctx).await;
            ctx.mark_status(&report.entity, report.status);
            reports.push(report);
        }

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let mut entities_succeeded = 0;
        let mut entities_failed = 0;
        let mut entities_skipped = 0;
        let mut records_loaded: i64 = 0;
        let mut failed_entities: Vec<String> = Vec::new();

        for report in &reports {
            match report.status {
                EntityStatus::Succeeded => {
                    entities_succeeded += 1;
                    if let Some(load) = report.stage(Stage::Load) {
                        records_loaded += load
                            .counts
                            .iter()
                            .filter(|(key, _)| key.starts_with("inserted:"))
                            .map(|(_, count)| *count)
                            .sum::<i64>();
                    }
                }
                EntityStatus::NotAttempted => entities_skipped += 1,
                _ => {
                    entities_failed += 1;
                    failed_entities.push(report.entity.clone());
                }
            }
        }

        let success = entities_failed == 0;
        let status = if success { "completed" } else { "failed" };
        if !success {
            warn!(
                "Run {} finished with failed entities: {}",
                run_id,
                failed_entities.join(", ")
            );
        }

        let report = RunReport {
            run_id,
            plan_hash: self.plan.hash(),
            status: status.to_string(),
            success,
            dry_run: options.dry_run,
            started_at,
            completed_at,
            duration_seconds: duration,
            entities_total: self.plan.entities.len(),
            entities_succeeded,
            entities_failed,
            entities_skipped,
            records_loaded,
            failed_entities,
            entities: reports,
        };

        info!(
            "Migration {}: {}/{} entities, {} records in {:.1}s",
            report.status,
            report.entities_succeeded,
            report.entities_total - report.entities_skipped,
            report.records_loaded,
            report.duration_seconds
        );

        Ok(report)
    }

    /// Resolve the run filter into the set of entities to attempt.
    fn attempted_entities(&self, options: &RunOptions) -> Result<HashSet<String>> {
        if options.only.is_empty() {
            return Ok(self
                .plan
                .entities
                .iter()
                .map(|e| e.name.clone())
                .collect());
        }
        let mut attempted = HashSet::new();
        for name in &options.only {
            if self.plan.entity(name).is_none() {
                return Err(MigrateError::Config(format!(
                    "run filter names unknown entity '{name}'"
                )));
            }
            attempted.insert(name.clone());
        }
        Ok(attempted)
    }

    /// Fail fast when an attempted entity has no writer or no mapper.
    fn check_registrations(&self, attempted: &HashSet<String>) -> Result<()> {
        for spec in &self.plan.entities {
            if !attempted.contains(&spec.name) {
                continue;
            }
            if !self.targets.contains_key(&spec.store) {
                return Err(MigrateError::Config(format!(
                    "entity '{}' targets store '{}' but no writer is registered for it",
                    spec.name, spec.store
                )));
            }
            if !self.mappers.contains_key(&spec.name) {
                return Err(MigrateError::Config(format!(
                    "no mapper registered for entity '{}'",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// Dependency-respecting execution order.
    ///
    /// Kahn's algorithm over `depends_on`, taking ready entities in plan
    /// declaration order so independent entities keep their declared
    /// sequence. Plan validation has already rejected cycles, so this
    /// always yields every entity.
    fn execution_order(&self) -> Vec<String> {
        let names: Vec<&str> = self.plan.entities.iter().map(|e| e.name.as_str()).collect();
        let mut remaining: HashMap<&str, usize> = self
            .plan
            .entities
            .iter()
            .map(|e| (e.name.as_str(), e.depends_on.len()))
            .collect();
        let mut order: Vec<String> = Vec::with_capacity(names.len());
        let mut placed: HashSet<&str> = HashSet::new();

        while order.len() < names.len() {
            let mut advanced = false;
            for name in &names {
                if placed.contains(name) {
                    continue;
                }
                if remaining.get(name).copied().unwrap_or(0) == 0 {
                    placed.insert(*name);
                    order.push((*name).to_string());
                    advanced = true;
                    for spec in &self.plan.entities {
                        if spec.depends_on.iter().any(|d| d == name) {
                            if let Some(count) = remaining.get_mut(spec.name.as_str()) {
                                *count -= 1;
                            }
                        }
                    }
                }
            }
            if !advanced {
                // Unreachable with a validated plan; fall back to the
                // declared order for whatever is left.
                for name in &names {
                    if !placed.contains(name) {
                        order.push((*name).to_string());
                    }
                }
                break;
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EntitySpec, IdStrategy, RecordSetSpec};
    use crate::stores::MemorySource;

    fn entity(name: &str, depends_on: &[&str]) -> EntitySpec {
        EntitySpec {
            name: name.to_string(),
            store: format!("{name}-db"),
            id_strategy: IdStrategy::Preserve,
            sets: vec![RecordSetSpec {
                name: name.to_string(),
                query: format!("select_{name}"),
                collection: name.to_string(),
                id_column: "id".to_string(),
            }],
            relations: Vec::new(),
            depends_on: depends_on.iter().map(|d| (*d).to_string()).collect(),
        }
    }

    fn runner_for(entities: Vec<EntitySpec>) -> MigrationRunner {
        let plan = MigrationPlan { entities };
        MigrationRunner::new(plan, Arc::new(MemorySource::new()))
    }

    #[test]
    fn test_execution_order_respects_dependencies() {
        let runner = runner_for(vec![
            entity("memberships", &["users", "accounts"]),
            entity("users", &[]),
            entity("accounts", &[]),
        ]);
        let order = runner.execution_order();
        assert_eq!(order, vec!["users", "accounts", "memberships"]);
    }

    #[test]
    fn test_execution_order_keeps_declaration_order_between_independents() {
        let runner = runner_for(vec![
            entity("zebras", &[]),
            entity("apples", &[]),
            entity("mangos", &[]),
        ]);
        let order = runner.execution_order();
        assert_eq!(order, vec!["zebras", "apples", "mangos"]);
    }

    #[test]
    fn test_unknown_filter_entity_is_config_error() {
        let runner = runner_for(vec![entity("users", &[])]);
        let err = runner
            .attempted_entities(&RunOptions {
                only: vec!["nope".to_string()],
                dry_run: false,
            })
            .unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }
}
