//! Per-entity migration pipeline.
//!
//! One [`EntityPipeline`] runs one entity through the fixed stage sequence:
//! extract, pre-validate, transform, post-validate, load, verify. A failed
//! stage short-circuits the rest; stages after the first never see data the
//! previous stage did not accept. The pipeline never returns an error, its
//! result is always an [`EntityReport`] and the runner decides nothing from
//! it beyond aggregation.

mod context;
mod mapper;

pub use context::{RunContext, TransformContext};
pub use mapper::EntityMapper;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::{EntitySpec, MigrationPlan, Relation};
use crate::core::{Extraction, Id, SourceReader, TargetWriter};
use crate::error::{MigrateError, Result};
use crate::graph::{embed_join, link_tree, NodeArena};
use crate::mapping::IdentityMap;
use crate::report::{EntityReport, EntityStatus, ReportSink, Stage, StageOutcome, StageStatus};

/// Drives one entity through every stage.
pub struct EntityPipeline<'a> {
    spec: &'a EntitySpec,
    plan: &'a MigrationPlan,
    source: Arc<dyn SourceReader>,
    targets: &'a HashMap<String, Arc<dyn TargetWriter>>,
    mapper: Arc<dyn EntityMapper>,
    sinks: &'a [Arc<dyn ReportSink>],
    dry_run: bool,
}

impl<'a> EntityPipeline<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spec: &'a EntitySpec,
        plan: &'a MigrationPlan,
        source: Arc<dyn SourceReader>,
        targets: &'a HashMap<String, Arc<dyn TargetWriter>>,
        mapper: Arc<dyn EntityMapper>,
        sinks: &'a [Arc<dyn ReportSink>],
        dry_run: bool,
    ) -> Self {
        Self {
            spec,
            plan,
            source,
            targets,
            mapper,
            sinks,
            dry_run,
        }
    }

    /// Run every stage in order and report the outcome.
    ///
    /// Failures are folded into the report, not returned: a pre-load
    /// failure reports `failed_validation` with the precise stage kept in
    /// `failed_stage`, a load failure `failed_load`, a verification failure
    /// `failed_integrity`.
    pub async fn run(self, ctx: &mut RunContext) -> EntityReport {
        let entity_start = Instant::now();
        info!(
            "{}: starting migration (store '{}', {} record sets)",
            self.spec.name,
            self.spec.store,
            self.spec.sets.len()
        );
        let mut stages: Vec<StageOutcome> = Vec::new();

        let mut outcome = StageOutcome::passed(Stage::Extract);
        let stage_start = Instant::now();
        let extraction = match self.extract(&mut outcome).await {
            Ok(extraction) => extraction,
            Err(e) => {
                return self
                    .entity_failed(stages, outcome, stage_start, entity_start, e)
                    .await
            }
        };
        self.finish_stage(&mut stages, outcome, stage_start).await;

        let mut outcome = StageOutcome::passed(Stage::ValidatePre);
        let stage_start = Instant::now();
        if let Err(e) = self.validate_pre(ctx, &extraction, &mut outcome).await {
            return self
                .entity_failed(stages, outcome, stage_start, entity_start, e)
                .await;
        }
        self.finish_stage(&mut stages, outcome, stage_start).await;

        let mut outcome = StageOutcome::passed(Stage::Transform);
        let stage_start = Instant::now();
        let arenas = match self.transform(ctx, &extraction, &mut outcome).await {
            Ok(arenas) => arenas,
            Err(e) => {
                return self
                    .entity_failed(stages, outcome, stage_start, entity_start, e)
                    .await
            }
        };
        self.finish_stage(&mut stages, outcome, stage_start).await;

        let mut outcome = StageOutcome::passed(Stage::ValidatePost);
        let stage_start = Instant::now();
        if let Err(e) = self.validate_post(ctx, &arenas, &mut outcome).await {
            return self
                .entity_failed(stages, outcome, stage_start, entity_start, e)
                .await;
        }
        if self.dry_run {
            for (set, arena) in self.spec.sets.iter().zip(&arenas) {
                outcome.add_count(format!("would_insert:{}", set.collection), arena.len() as i64);
            }
        }
        self.finish_stage(&mut stages, outcome, stage_start).await;

        if self.dry_run {
            info!("{}: dry run, stopping before load", self.spec.name);
            return EntityReport {
                entity: self.spec.name.clone(),
                status: EntityStatus::Succeeded,
                failed_stage: None,
                error: None,
                stages,
                duration_ms: entity_start.elapsed().as_millis() as u64,
            };
        }

        let mut outcome = StageOutcome::passed(Stage::Load);
        let stage_start = Instant::now();
        if let Err(e) = self.load(&arenas, &mut outcome).await {
            return self
                .entity_failed(stages, outcome, stage_start, entity_start, e)
                .await;
        }
        self.finish_stage(&mut stages, outcome, stage_start).await;

        let mut outcome = StageOutcome::passed(Stage::ValidateIntegrity);
        let stage_start = Instant::now();
        if let Err(e) = self.validate_integrity(ctx, &arenas, &mut outcome).await {
            return self
                .entity_failed(stages, outcome, stage_start, entity_start, e)
                .await;
        }
        self.finish_stage(&mut stages, outcome, stage_start).await;

        let duration_ms = entity_start.elapsed().as_millis() as u64;
        info!("{}: migration complete ({} ms)", self.spec.name, duration_ms);
        EntityReport {
            entity: self.spec.name.clone(),
            status: EntityStatus::Succeeded,
            failed_stage: None,
            error: None,
            stages,
            duration_ms,
        }
    }

    /// Read every record set and every join edge query in full.
    async fn extract(&self, outcome: &mut StageOutcome) -> Result<Extraction> {
        let mut extraction = Extraction::new();
        for set in &self.spec.sets {
            let rows = self.source.read(&set.query).await?;
            debug!(
                "{}: extracted {} rows for set '{}'",
                self.spec.name,
                rows.len(),
                set.name
            );
            outcome.add_count(format!("extracted:{}", set.name), rows.len() as i64);
            extraction.insert_set(&set.name, rows);
        }
        for rel in &self.spec.relations {
            if let Relation::Join(join) = rel {
                let rows = self.source.read(&join.edge_query).await?;
                debug!(
                    "{}: extracted {} edges for '{}'",
                    self.spec.name,
                    rows.len(),
                    join.edge_query
                );
                outcome.add_count(format!("edges:{}", join.edge_query), rows.len() as i64);
                extraction.insert_edges(&join.edge_query, rows);
            }
        }
        Ok(extraction)
    }

    /// Structural checks and dependency probes before transform.
    ///
    /// A dependency that succeeded in this run passes outright. One that
    /// did not run is probed through its target store; populated is good
    /// enough. A dependency that ran and failed is always a problem, its
    /// store now holds data this entity must not build on.
    async fn validate_pre(
        &self,
        ctx: &RunContext,
        extraction: &Extraction,
        outcome: &mut StageOutcome,
    ) -> Result<()> {
        let mut problems: Vec<String> = Vec::new();

        for dep in &self.spec.depends_on {
            match ctx.status(dep) {
                Some(EntityStatus::Succeeded) => {}
                Some(EntityStatus::NotAttempted) | None => {
                    if let Some(problem) = self.probe_dependency(dep, outcome).await {
                        problems.push(problem);
                    }
                }
                Some(_) => {
                    problems.push(format!("dependency '{dep}' failed earlier in this run"));
                }
            }
        }

        for set in &self.spec.sets {
            let rows = extraction.set_rows(&set.name);
            let mut seen: HashSet<Id> = HashSet::with_capacity(rows.len());
            for (idx, row) in rows.iter().enumerate() {
                match row.id_value(&set.id_column) {
                    Some(id) if id.is_nil() => {
                        problems.push(format!(
                            "set '{}' row {idx}: unusable id in column '{}'",
                            set.name, set.id_column
                        ));
                    }
                    Some(id) => {
                        if !seen.insert(id.clone()) {
                            problems.push(format!(
                                "set '{}' row {idx}: duplicate id {id}",
                                set.name
                            ));
                        }
                    }
                    None => {
                        problems.push(format!(
                            "set '{}' row {idx}: missing or null id column '{}'",
                            set.name, set.id_column
                        ));
                    }
                }
            }
            outcome.add_count(format!("validated:{}", set.name), rows.len() as i64);
        }

        problems.extend(self.mapper.validate_source(extraction));

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MigrateError::source_data(
                self.spec.name.clone(),
                problems.join("; "),
            ))
        }
    }

    /// Probe a dependency that did not run in this invocation.
    ///
    /// Returns the problem text when the probe fails, `None` when the
    /// dependency's store is populated.
    async fn probe_dependency(&self, dep: &str, outcome: &mut StageOutcome) -> Option<String> {
        let Some(dep_spec) = self.plan.entity(dep) else {
            return Some(format!("dependency '{dep}' is not in the plan"));
        };
        let Some(first) = dep_spec.sets.first() else {
            return Some(format!("dependency '{dep}' has no record sets"));
        };
        let writer = match self.writer_for(&dep_spec.store) {
            Ok(writer) => writer,
            Err(_) => {
                return Some(format!(
                    "dependency '{dep}': no writer registered for store '{}'",
                    dep_spec.store
                ))
            }
        };
        match writer.get_row_count(&first.collection).await {
            Ok(count) if count > 0 => {
                debug!(
                    "{}: dependency '{}' holds {} migrated records",
                    self.spec.name, dep, count
                );
                outcome.add_count(format!("dependency_rows:{dep}"), count);
                None
            }
            Ok(_) => Some(format!(
                "dependency '{dep}' has no migrated data in collection '{}'",
                first.collection
            )),
            Err(e) => Some(format!("dependency '{dep}' store probe failed: {e}")),
        }
    }

    /// Allocate ids, transform rows, then run the relationship passes.
    ///
    /// Allocation covers every row of every set before the first row
    /// transforms, so a transform can resolve references into any set of
    /// this entity regardless of row order. Returned arenas are aligned
    /// with `spec.sets`.
    async fn transform(
        &self,
        ctx: &mut RunContext,
        extraction: &Extraction,
        outcome: &mut StageOutcome,
    ) -> Result<Vec<NodeArena>> {
        for set in &self.spec.sets {
            let mut map = IdentityMap::new(&self.spec.name, &set.name, self.spec.id_strategy);
            for row in extraction.set_rows(&set.name) {
                if let Some(old) = row.id_value(&set.id_column) {
                    map.allocate(&old);
                }
            }
            debug!(
                "{}: allocated {} ids for set '{}'",
                self.spec.name,
                map.len(),
                set.name
            );
            ctx.insert_map(&self.spec.name, map);
        }

        self.mapper.prefetch(extraction, ctx.lookup_mut()).await?;

        let mut arenas: Vec<NodeArena> = Vec::with_capacity(self.spec.sets.len());
        let mut warnings: Vec<String> = Vec::new();
        for set in &self.spec.sets {
            let map = ctx
                .map(&self.spec.name, &set.name)
                .ok_or_else(|| {
                    MigrateError::transform(
                        self.spec.name.clone(),
                        format!("set '{}' has no identity map", set.name),
                    )
                })?;
            let mut arena = NodeArena::new(&set.name);
            let mut dropped: i64 = 0;
            for row in extraction.set_rows(&set.name) {
                let Some(old) = row.id_value(&set.id_column) else {
                    continue;
                };
                let new = map.resolve(&old)?;
                let mut row_ctx = TransformContext::new(
                    self.spec,
                    self.plan,
                    &set.name,
                    &old,
                    &new,
                    ctx,
                    &mut warnings,
                );
                match self.mapper.transform_row(row, &mut row_ctx)? {
                    Some(record) => {
                        if record.id() != &new {
                            return Err(MigrateError::transform(
                                self.spec.name.clone(),
                                format!(
                                    "set '{}': record for {old} carries id {} instead of the allocated {new}",
                                    set.name,
                                    record.id()
                                ),
                            ));
                        }
                        arena.push(old, row.clone(), record);
                    }
                    None => {
                        dropped += 1;
                        debug!("{}: set '{}' dropped row {}", self.spec.name, set.name, old);
                    }
                }
            }
            outcome.add_count(format!("transformed:{}", set.name), arena.len() as i64);
            if dropped > 0 {
                outcome.add_count(format!("dropped:{}", set.name), dropped);
            }
            arenas.push(arena);
        }
        outcome.warnings.append(&mut warnings);

        for rel in &self.spec.relations {
            match rel {
                Relation::Tree(tree) => {
                    let pos = arena_index(&arenas, &tree.set).ok_or_else(|| {
                        MigrateError::transform(
                            self.spec.name.clone(),
                            format!("tree relation names unknown set '{}'", tree.set),
                        )
                    })?;
                    let stats = link_tree(&self.spec.name, &mut arenas[pos], tree)?;
                    outcome.add_count(format!("tree_linked:{}", tree.set), stats.linked as i64);
                    outcome.add_count(format!("tree_roots:{}", tree.set), stats.roots as i64);
                    if stats.missing_parents > 0 {
                        outcome.add_count(
                            format!("tree_missing_parents:{}", tree.set),
                            stats.missing_parents as i64,
                        );
                    }
                    if stats.invalid_positions > 0 {
                        outcome.add_count(
                            format!("tree_invalid_positions:{}", tree.set),
                            stats.invalid_positions as i64,
                        );
                    }
                    outcome.warnings.extend(stats.warnings);
                }
                Relation::Join(join) => {
                    let li = arena_index(&arenas, &join.left.set).ok_or_else(|| {
                        MigrateError::transform(
                            self.spec.name.clone(),
                            format!("join relation names unknown set '{}'", join.left.set),
                        )
                    })?;
                    let ri = arena_index(&arenas, &join.right.set).ok_or_else(|| {
                        MigrateError::transform(
                            self.spec.name.clone(),
                            format!("join relation names unknown set '{}'", join.right.set),
                        )
                    })?;
                    if li == ri {
                        return Err(MigrateError::transform(
                            self.spec.name.clone(),
                            format!("join '{}' sides must be distinct record sets", join.edge_query),
                        ));
                    }
                    let edges = extraction.edge_rows(&join.edge_query);
                    let (left, right) = disjoint_pair(&mut arenas, li, ri);
                    let stats = embed_join(&self.spec.name, left, right, edges, join)?;
                    outcome.add_count(
                        format!("join_embedded:{}", join.edge_query),
                        stats.embedded as i64,
                    );
                    if stats.dropped > 0 {
                        outcome.add_count(
                            format!("join_dropped:{}", join.edge_query),
                            stats.dropped as i64,
                        );
                    }
                    outcome.warnings.extend(stats.warnings);
                }
            }
        }

        Ok(arenas)
    }

    /// Check the transformed records before anything touches the target.
    async fn validate_post(
        &self,
        ctx: &RunContext,
        arenas: &[NodeArena],
        outcome: &mut StageOutcome,
    ) -> Result<()> {
        let closure = self.reference_closure(ctx, arenas).await?;
        let mut problems: Vec<String> = Vec::new();

        for arena in arenas {
            let mut seen: HashSet<&Id> = HashSet::with_capacity(arena.len());
            for pos in 0..arena.len() {
                let record = arena.record(pos);
                if record.id().is_nil() {
                    problems.push(format!(
                        "set '{}': record from {} has no usable id",
                        arena.set(),
                        arena.old_id(pos)
                    ));
                }
                if !seen.insert(record.id()) {
                    problems.push(format!(
                        "set '{}': duplicate record id {}",
                        arena.set(),
                        record.id()
                    ));
                }
                for id in record.refs() {
                    if !closure.contains(id) {
                        problems.push(format!(
                            "set '{}': record {} references unknown id {id}",
                            arena.set(),
                            record.id()
                        ));
                    }
                }
                problems.extend(self.mapper.validate_record(record));
            }
            outcome.add_count(format!("checked:{}", arena.set()), arena.len() as i64);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MigrateError::transform(
                self.spec.name.clone(),
                problems.join("; "),
            ))
        }
    }

    /// Clear every collection, then bulk-insert, then resync sequences.
    ///
    /// All collections are cleared before the first insert so a mid-load
    /// failure leaves empty collections, never a half-old store. Partial
    /// counts stay on the outcome either way, a failed load must still say
    /// what it did to the target.
    async fn load(&self, arenas: &[NodeArena], outcome: &mut StageOutcome) -> Result<()> {
        let writer = self.writer_for(&self.spec.store)?;

        for set in &self.spec.sets {
            let deleted = writer.clear(&set.collection).await.map_err(|e| {
                MigrateError::load(self.spec.name.clone(), set.collection.clone(), e.to_string())
            })?;
            debug!(
                "{}: cleared {} records from '{}'",
                self.spec.name, deleted, set.collection
            );
            outcome.add_count(format!("cleared:{}", set.collection), deleted as i64);
        }

        for (set, arena) in self.spec.sets.iter().zip(arenas) {
            let inserted = writer
                .bulk_insert(&set.collection, arena.records())
                .await
                .map_err(|e| {
                    MigrateError::load(
                        self.spec.name.clone(),
                        set.collection.clone(),
                        e.to_string(),
                    )
                })?;
            info!(
                "{}: loaded {} records into '{}'",
                self.spec.name, inserted, set.collection
            );
            outcome.add_count(format!("inserted:{}", set.collection), inserted as i64);
        }

        if self.spec.id_strategy.preserves_ids() {
            for (set, arena) in self.spec.sets.iter().zip(arenas) {
                let max = arena
                    .records()
                    .iter()
                    .filter_map(|r| r.id().as_int())
                    .max();
                if let Some(max) = max {
                    writer.resync_sequence(&set.collection, max).await.map_err(|e| {
                        MigrateError::load(
                            self.spec.name.clone(),
                            set.collection.clone(),
                            e.to_string(),
                        )
                    })?;
                    debug!(
                        "{}: resynced '{}' sequence past {}",
                        self.spec.name, set.collection, max
                    );
                    outcome.add_count(format!("resynced:{}", set.collection), max);
                }
            }
        }

        Ok(())
    }

    /// Re-read the target and verify counts and stored references.
    async fn validate_integrity(
        &self,
        ctx: &RunContext,
        arenas: &[NodeArena],
        outcome: &mut StageOutcome,
    ) -> Result<()> {
        let writer = self.writer_for(&self.spec.store)?;
        let closure = self.reference_closure(ctx, arenas).await?;
        let mut problems: Vec<String> = Vec::new();

        for (set, arena) in self.spec.sets.iter().zip(arenas) {
            let count = writer.get_row_count(&set.collection).await.map_err(|e| {
                MigrateError::integrity(self.spec.name.clone(), e.to_string())
            })?;
            outcome.add_count(format!("verified:{}", set.collection), count);
            if count != arena.len() as i64 {
                problems.push(format!(
                    "collection '{}': expected {} records, found {count}",
                    set.collection,
                    arena.len()
                ));
            }

            let stored = writer.read_back(&set.collection).await.map_err(|e| {
                MigrateError::integrity(self.spec.name.clone(), e.to_string())
            })?;
            for record in &stored {
                for id in record.refs() {
                    if !closure.contains(id) {
                        problems.push(format!(
                            "collection '{}': record {} references unknown id {id}",
                            set.collection,
                            record.id()
                        ));
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MigrateError::integrity(
                self.spec.name.clone(),
                problems.join("; "),
            ))
        }
    }

    /// Every id a reference from this entity may legitimately point at.
    ///
    /// Own records across all sets, each declared dependency's migrated
    /// ids (from this run's maps when it ran, from its store otherwise),
    /// and every identity the lookup cache resolved.
    async fn reference_closure(
        &self,
        ctx: &RunContext,
        arenas: &[NodeArena],
    ) -> Result<HashSet<Id>> {
        let mut closure: HashSet<Id> = HashSet::new();
        for arena in arenas {
            closure.extend(arena.record_ids());
        }
        for dep in &self.spec.depends_on {
            if ctx.has_entity(dep) {
                closure.extend(ctx.entity_new_ids(dep));
            } else if let Some(dep_spec) = self.plan.entity(dep) {
                let writer = self.writer_for(&dep_spec.store)?;
                for set in &dep_spec.sets {
                    for record in writer.read_back(&set.collection).await? {
                        closure.insert(record.id().clone());
                    }
                }
            }
        }
        closure.extend(ctx.lookup().known_ids());
        Ok(closure)
    }

    fn writer_for(&self, store: &str) -> Result<&Arc<dyn TargetWriter>> {
        self.targets.get(store).ok_or_else(|| {
            MigrateError::Config(format!("no target writer registered for store '{store}'"))
        })
    }

    /// Stamp the duration, fan out to sinks, keep the outcome.
    async fn finish_stage(
        &self,
        stages: &mut Vec<StageOutcome>,
        mut outcome: StageOutcome,
        stage_start: Instant,
    ) {
        outcome.duration_ms = stage_start.elapsed().as_millis() as u64;
        for warning in &outcome.warnings {
            warn!("{}: {}", self.spec.name, warning);
        }
        self.emit(&outcome).await;
        stages.push(outcome);
    }

    /// Fold a failed stage into the entity report.
    async fn entity_failed(
        &self,
        mut stages: Vec<StageOutcome>,
        mut outcome: StageOutcome,
        stage_start: Instant,
        entity_start: Instant,
        err: MigrateError,
    ) -> EntityReport {
        let stage = outcome.stage;
        outcome.status = StageStatus::Failed;
        outcome.error = Some(err.to_string());
        outcome.duration_ms = stage_start.elapsed().as_millis() as u64;
        error!(
            "{}: {} stage failed: {}",
            self.spec.name,
            stage.as_str(),
            err
        );
        self.emit(&outcome).await;
        stages.push(outcome);

        let status = match stage {
            Stage::Load => EntityStatus::FailedLoad,
            Stage::ValidateIntegrity => EntityStatus::FailedIntegrity,
            _ => EntityStatus::FailedValidation,
        };
        EntityReport {
            entity: self.spec.name.clone(),
            status,
            failed_stage: Some(stage),
            error: Some(err.to_string()),
            stages,
            duration_ms: entity_start.elapsed().as_millis() as u64,
        }
    }

    /// Hand a stage outcome to every sink. A sink error is the sink's
    /// problem, not the entity's.
    async fn emit(&self, outcome: &StageOutcome) {
        for sink in self.sinks {
            if let Err(e) = sink.record(&self.spec.name, outcome).await {
                warn!(
                    "{}: report sink rejected {} outcome: {}",
                    self.spec.name,
                    outcome.stage.as_str(),
                    e
                );
            }
        }
    }
}

fn arena_index(arenas: &[NodeArena], set: &str) -> Option<usize> {
    arenas.iter().position(|a| a.set() == set)
}

/// Mutable access to two distinct arenas at once. Callers have already
/// rejected `li == ri`.
fn disjoint_pair(arenas: &mut [NodeArena], li: usize, ri: usize) -> (&mut NodeArena, &mut NodeArena) {
    if li < ri {
        let (head, tail) = arenas.split_at_mut(ri);
        (&mut head[li], &mut tail[0])
    } else {
        let (head, tail) = arenas.split_at_mut(li);
        (&mut tail[0], &mut head[ri])
    }
}
