//! Per-run and per-row context.
//!
//! Everything with run lifetime lives in [`RunContext`]: identity maps,
//! entity outcomes, the lookup cache. It is created by the runner for one
//! invocation and dropped with it, so no mapping or cached identity can
//! leak into the next run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{EntitySpec, MigrationPlan};
use crate::core::{Id, Identity, IdentitySource};
use crate::error::{MigrateError, Result};
use crate::lookup::LookupCache;
use crate::mapping::IdentityMap;
use crate::report::EntityStatus;

/// Mutable state shared by all pipelines of one run.
pub struct RunContext {
    run_id: String,
    maps: HashMap<String, HashMap<String, IdentityMap>>,
    statuses: HashMap<String, EntityStatus>,
    lookup: LookupCache,
}

impl RunContext {
    /// Create the context for one runner invocation.
    pub fn new(run_id: impl Into<String>, identities: Arc<dyn IdentitySource>) -> Self {
        Self {
            run_id: run_id.into(),
            maps: HashMap::new(),
            statuses: HashMap::new(),
            lookup: LookupCache::new(identities),
        }
    }

    /// The run identifier.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Register a record set's identity map under its entity.
    pub fn insert_map(&mut self, entity: &str, map: IdentityMap) {
        self.maps
            .entry(entity.to_string())
            .or_default()
            .insert(map.set().to_string(), map);
    }

    /// The identity map of one (entity, set), if that entity has run.
    #[must_use]
    pub fn map(&self, entity: &str, set: &str) -> Option<&IdentityMap> {
        self.maps.get(entity).and_then(|sets| sets.get(set))
    }

    /// Whether an entity has allocated maps in this run.
    #[must_use]
    pub fn has_entity(&self, entity: &str) -> bool {
        self.maps.contains_key(entity)
    }

    /// Every new id an entity allocated in this run, across its sets.
    #[must_use]
    pub fn entity_new_ids(&self, entity: &str) -> HashSet<Id> {
        let mut ids = HashSet::new();
        if let Some(sets) = self.maps.get(entity) {
            for map in sets.values() {
                ids.extend(map.new_ids().cloned());
            }
        }
        ids
    }

    /// Record an entity's terminal status.
    pub fn mark_status(&mut self, entity: &str, status: EntityStatus) {
        self.statuses.insert(entity.to_string(), status);
    }

    /// An entity's terminal status, if it was attempted in this run.
    #[must_use]
    pub fn status(&self, entity: &str) -> Option<EntityStatus> {
        self.statuses.get(entity).copied()
    }

    /// Shared access to the lookup cache.
    #[must_use]
    pub fn lookup(&self) -> &LookupCache {
        &self.lookup
    }

    /// Mutable access for prefetching.
    pub fn lookup_mut(&mut self) -> &mut LookupCache {
        &mut self.lookup
    }
}

/// What one row's transform may see and do.
///
/// Handed to [`EntityMapper::transform_row`] with the row's old and new ids
/// already resolved. All lookups were prefetched and all allocations made
/// before the first row transforms, so everything here is synchronous.
///
/// [`EntityMapper::transform_row`]: crate::pipeline::EntityMapper::transform_row
pub struct TransformContext<'a> {
    spec: &'a EntitySpec,
    plan: &'a MigrationPlan,
    set: &'a str,
    old_id: &'a Id,
    new_id: &'a Id,
    run: &'a RunContext,
    warnings: &'a mut Vec<String>,
}

impl<'a> TransformContext<'a> {
    pub(crate) fn new(
        spec: &'a EntitySpec,
        plan: &'a MigrationPlan,
        set: &'a str,
        old_id: &'a Id,
        new_id: &'a Id,
        run: &'a RunContext,
        warnings: &'a mut Vec<String>,
    ) -> Self {
        Self {
            spec,
            plan,
            set,
            old_id,
            new_id,
            run,
            warnings,
        }
    }

    /// The record set being transformed.
    #[must_use]
    pub fn set(&self) -> &str {
        self.set
    }

    /// The source id of the current row.
    #[must_use]
    pub fn old_id(&self) -> &Id {
        self.old_id
    }

    /// The id allocated for the current row. The produced record must carry
    /// exactly this id.
    #[must_use]
    pub fn new_id(&self) -> Id {
        self.new_id.clone()
    }

    /// Record a non-fatal observation on the stage report.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// A prefetched identity by natural key, if the service knows it.
    #[must_use]
    pub fn lookup(&self, entity_kind: &str, key: &str) -> Option<&Identity> {
        self.run.lookup().get(entity_kind, key)
    }

    /// Resolve a reference into a declared dependency's record set.
    ///
    /// Resolution order: the dependency's identity map when it ran in this
    /// invocation, else identity passthrough when the dependency preserves
    /// its ids (which is what makes isolated re-runs possible). Anything
    /// else is a [`MigrateError::MissingMapping`].
    pub fn dependency_id(&self, entity: &str, set: &str, old_id: &Id) -> Result<Id> {
        if !self.spec.depends_on.iter().any(|d| d == entity) {
            return Err(MigrateError::transform(
                self.spec.name.clone(),
                format!(
                    "set '{}': reference into '{}' requires a declared dependency",
                    self.set, entity
                ),
            ));
        }
        if let Some(map) = self.run.map(entity, set) {
            return map.resolve(old_id);
        }
        match self.plan.entity(entity) {
            Some(dep) if dep.id_strategy.preserves_ids() => Ok(old_id.clone()),
            _ => Err(MigrateError::missing_mapping(entity, set, old_id.clone())),
        }
    }

    /// Probe a dependency reference without failing.
    ///
    /// For references the mapper may legitimately null out. Undeclared
    /// dependencies and unmapped ids both come back as `None`; the
    /// post-transform validation still catches anything left dangling.
    #[must_use]
    pub fn try_dependency_id(&self, entity: &str, set: &str, old_id: &Id) -> Option<Id> {
        if !self.spec.depends_on.iter().any(|d| d == entity) {
            return None;
        }
        if let Some(map) = self.run.map(entity, set) {
            return map.get(old_id).cloned();
        }
        match self.plan.entity(entity) {
            Some(dep) if dep.id_strategy.preserves_ids() => Some(old_id.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdStrategy, RecordSetSpec};
    use crate::stores::NullIdentitySource;

    fn spec_with_dep() -> (EntitySpec, MigrationPlan) {
        let users = EntitySpec {
            name: "users".to_string(),
            store: "user-db".to_string(),
            id_strategy: IdStrategy::Preserve,
            sets: vec![RecordSetSpec {
                name: "users".to_string(),
                query: "select_users".to_string(),
                collection: "users".to_string(),
                id_column: "id".to_string(),
            }],
            relations: Vec::new(),
            depends_on: Vec::new(),
        };
        let memberships = EntitySpec {
            name: "memberships".to_string(),
            store: "membership-db".to_string(),
            id_strategy: IdStrategy::GenerateSequence,
            sets: vec![RecordSetSpec {
                name: "memberships".to_string(),
                query: "select_memberships".to_string(),
                collection: "memberships".to_string(),
                id_column: "id".to_string(),
            }],
            relations: Vec::new(),
            depends_on: vec!["users".to_string()],
        };
        let plan = MigrationPlan {
            entities: vec![users, memberships.clone()],
        };
        (memberships, plan)
    }

    #[test]
    fn test_dependency_id_uses_run_map_first() {
        let (spec, plan) = spec_with_dep();
        let mut run = RunContext::new("run-1", Arc::new(NullIdentitySource));
        let mut map = IdentityMap::new("users", "users", IdStrategy::GenerateSequence);
        map.allocate(&Id::Int(40));
        run.insert_map("users", map);

        let old = Id::Int(7);
        let new = Id::Int(1);
        let mut warnings = Vec::new();
        let ctx = TransformContext::new(
            &spec, &plan, "memberships", &old, &new, &run, &mut warnings,
        );

        assert_eq!(ctx.dependency_id("users", "users", &Id::Int(40)).unwrap(), Id::Int(1));
        assert!(ctx.dependency_id("users", "users", &Id::Int(41)).is_err());
    }

    #[test]
    fn test_dependency_id_falls_back_to_preserved_ids() {
        let (spec, plan) = spec_with_dep();
        let run = RunContext::new("run-1", Arc::new(NullIdentitySource));

        let old = Id::Int(7);
        let new = Id::Int(1);
        let mut warnings = Vec::new();
        let ctx = TransformContext::new(
            &spec, &plan, "memberships", &old, &new, &run, &mut warnings,
        );

        // users preserves ids and did not run in this invocation.
        assert_eq!(
            ctx.dependency_id("users", "users", &Id::Int(40)).unwrap(),
            Id::Int(40)
        );
        assert_eq!(
            ctx.try_dependency_id("users", "users", &Id::Int(40)),
            Some(Id::Int(40))
        );
    }

    #[test]
    fn test_undeclared_dependency_is_rejected() {
        let (spec, plan) = spec_with_dep();
        let run = RunContext::new("run-1", Arc::new(NullIdentitySource));

        let old = Id::Int(7);
        let new = Id::Int(1);
        let mut warnings = Vec::new();
        let ctx = TransformContext::new(
            &spec, &plan, "memberships", &old, &new, &run, &mut warnings,
        );

        assert!(ctx.dependency_id("accounts", "accounts", &Id::Int(1)).is_err());
        assert_eq!(ctx.try_dependency_id("accounts", "accounts", &Id::Int(1)), None);
    }
}
