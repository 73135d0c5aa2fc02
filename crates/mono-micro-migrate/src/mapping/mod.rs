//! Old-to-new identifier mapping.
//!
//! One [`IdentityMap`] exists per (entity, record set) and lives only for
//! the duration of a run. The pipeline allocates a new id for **every**
//! extracted record before it resolves a single cross-reference; the
//! allocate and resolve phases never interleave, which is what makes
//! arbitrary reference topologies (including forward references) safe.

use indexmap::IndexMap;
use uuid::Uuid;

use crate::config::IdStrategy;
use crate::core::Id;
use crate::error::{MigrateError, Result};

/// Old id to new id table for one record set.
#[derive(Debug)]
pub struct IdentityMap {
    entity: String,
    set: String,
    strategy: IdStrategy,
    map: IndexMap<Id, Id>,
    next_seq: i64,
}

impl IdentityMap {
    /// Create an empty map for a record set.
    ///
    /// Sequence generation starts at 1 and is scoped to this map, so each
    /// set gets a dense, allocation-ordered range per run.
    pub fn new(
        entity: impl Into<String>,
        set: impl Into<String>,
        strategy: IdStrategy,
    ) -> Self {
        Self {
            entity: entity.into(),
            set: set.into(),
            strategy,
            map: IndexMap::new(),
            next_seq: 1,
        }
    }

    /// The record set this map belongs to.
    #[must_use]
    pub fn set(&self) -> &str {
        &self.set
    }

    /// The strategy new ids are produced with.
    #[must_use]
    pub fn strategy(&self) -> IdStrategy {
        self.strategy
    }

    /// Allocate a new id for an old one.
    ///
    /// Idempotent per old id: the first allocation wins and repeats return
    /// the same new id, so duplicate source rows cannot split a mapping.
    pub fn allocate(&mut self, old: &Id) -> Id {
        if let Some(existing) = self.map.get(old) {
            return existing.clone();
        }
        let new = match self.strategy {
            IdStrategy::Preserve => old.clone(),
            IdStrategy::GenerateSequence => {
                let id = Id::Int(self.next_seq);
                self.next_seq += 1;
                id
            }
            IdStrategy::GenerateUuid => Id::Uuid(Uuid::new_v4()),
        };
        self.map.insert(old.clone(), new.clone());
        new
    }

    /// Allocate for every id in order.
    pub fn allocate_all<'a, I>(&mut self, olds: I)
    where
        I: IntoIterator<Item = &'a Id>,
    {
        for old in olds {
            self.allocate(old);
        }
    }

    /// Resolve an old id, failing loudly when no allocation exists.
    ///
    /// A miss here is always a bug or an unmigrated prerequisite, never
    /// something to paper over.
    pub fn resolve(&self, old: &Id) -> Result<Id> {
        self.map.get(old).cloned().ok_or_else(|| {
            MigrateError::missing_mapping(self.entity.clone(), self.set.clone(), old.clone())
        })
    }

    /// Probe for an old id without failing.
    ///
    /// Only for callers whose edge policy treats absence as a warning.
    #[must_use]
    pub fn get(&self, old: &Id) -> Option<&Id> {
        self.map.get(old)
    }

    /// Number of allocated mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if nothing has been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate over new ids in allocation order.
    pub fn new_ids(&self) -> impl Iterator<Item = &Id> {
        self.map.values()
    }

    /// The largest integer id on the new side, if any.
    ///
    /// Drives the post-load sequence resync for preserved identifiers.
    #[must_use]
    pub fn max_new_int(&self) -> Option<i64> {
        self.map.values().filter_map(Id::as_int).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserve_passes_ids_through() {
        let mut map = IdentityMap::new("users", "users", IdStrategy::Preserve);
        assert_eq!(map.allocate(&Id::Int(42)), Id::Int(42));
        assert_eq!(map.allocate(&Id::Text("u-1".into())), Id::Text("u-1".into()));
        assert_eq!(map.max_new_int(), Some(42));
    }

    #[test]
    fn test_sequence_allocates_in_order() {
        let mut map = IdentityMap::new("placements", "placements", IdStrategy::GenerateSequence);
        map.allocate_all([&Id::Int(900), &Id::Int(20), &Id::Int(57)]);

        assert_eq!(map.resolve(&Id::Int(900)).unwrap(), Id::Int(1));
        assert_eq!(map.resolve(&Id::Int(20)).unwrap(), Id::Int(2));
        assert_eq!(map.resolve(&Id::Int(57)).unwrap(), Id::Int(3));
        assert_eq!(map.max_new_int(), Some(3));
    }

    #[test]
    fn test_allocate_is_idempotent() {
        let mut map = IdentityMap::new("roles", "roles", IdStrategy::GenerateUuid);
        let first = map.allocate(&Id::Int(1));
        let second = map.allocate(&Id::Int(1));
        assert_eq!(first, second);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_uuid_ids_are_distinct() {
        let mut map = IdentityMap::new("roles", "roles", IdStrategy::GenerateUuid);
        let a = map.allocate(&Id::Int(1));
        let b = map.allocate(&Id::Int(2));
        assert_ne!(a, b);
        assert_eq!(map.max_new_int(), None);
    }

    #[test]
    fn test_resolve_missing_is_loud() {
        let map = IdentityMap::new("users", "users", IdStrategy::Preserve);
        let err = map.resolve(&Id::Int(5)).unwrap_err();
        match err {
            MigrateError::MissingMapping { entity, set, old_id } => {
                assert_eq!(entity, "users");
                assert_eq!(set, "users");
                assert_eq!(old_id, Id::Int(5));
            }
            other => panic!("expected MissingMapping, got {other:?}"),
        }
    }
}
