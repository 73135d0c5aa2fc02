//! Graph reconstruction over migrated records.
//!
//! Relationships are rebuilt only after every node of an entity exists and
//! has its new id. The passes work over a [`NodeArena`] per record set:
//! index-aligned rows and records plus an old-id index. Links are expressed
//! as arena positions and id values, never as references between records,
//! so arbitrary topologies (forward references, shared parents) need no
//! special handling.

mod join;
mod tree;

pub use join::{embed_join, JoinEmbedStats};
pub use tree::{link_tree, TreeLinkStats};

use std::collections::HashMap;

use crate::core::{Id, SourceRow, TargetRecord};

/// Index-aligned node storage for one record set.
///
/// Position `i` holds the i-th surviving row of the set, its transformed
/// record, and its old id. Rows a mapper dropped are never pushed, which is
/// why relationship passes check membership here and not in the identity
/// map: the map also remembers allocations for dropped rows.
#[derive(Debug)]
pub struct NodeArena {
    set: String,
    old_ids: Vec<Id>,
    rows: Vec<SourceRow>,
    records: Vec<TargetRecord>,
    index: HashMap<Id, usize>,
}

impl NodeArena {
    /// Create an empty arena for a record set.
    pub fn new(set: impl Into<String>) -> Self {
        Self {
            set: set.into(),
            old_ids: Vec::new(),
            rows: Vec::new(),
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// The record set this arena holds.
    #[must_use]
    pub fn set(&self) -> &str {
        &self.set
    }

    /// Append a node. Old ids must be unique, which extraction validation
    /// has already guaranteed by the time an arena is built.
    pub fn push(&mut self, old_id: Id, row: SourceRow, record: TargetRecord) {
        let pos = self.records.len();
        self.index.insert(old_id.clone(), pos);
        self.old_ids.push(old_id);
        self.rows.push(row);
        self.records.push(record);
    }

    /// Find a node's position by old id.
    #[must_use]
    pub fn lookup(&self, old_id: &Id) -> Option<usize> {
        self.index.get(old_id).copied()
    }

    /// Check whether an old id names a node in this arena.
    #[must_use]
    pub fn contains(&self, old_id: &Id) -> bool {
        self.index.contains_key(old_id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the arena has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The source row at a position.
    #[must_use]
    pub fn row(&self, pos: usize) -> &SourceRow {
        &self.rows[pos]
    }

    /// The record at a position.
    #[must_use]
    pub fn record(&self, pos: usize) -> &TargetRecord {
        &self.records[pos]
    }

    /// Mutable record access for relationship passes.
    pub fn record_mut(&mut self, pos: usize) -> &mut TargetRecord {
        &mut self.records[pos]
    }

    /// The old id at a position.
    #[must_use]
    pub fn old_id(&self, pos: usize) -> &Id {
        &self.old_ids[pos]
    }

    /// All records in arena order.
    #[must_use]
    pub fn records(&self) -> &[TargetRecord] {
        &self.records
    }

    /// New ids of all records, in arena order.
    #[must_use]
    pub fn record_ids(&self) -> Vec<Id> {
        self.records.iter().map(|r| r.id().clone()).collect()
    }

    /// Consume the arena, keeping only the finished records.
    #[must_use]
    pub fn into_records(self) -> Vec<TargetRecord> {
        self.records
    }
}
