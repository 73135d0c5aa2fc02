//! Migration plan type definitions.
//!
//! The plan is the declarative side of a migration: which entities exist,
//! which record sets and collections they own, how identifiers are produced,
//! which relationships get reconstructed, and what depends on what. The
//! behavioral side (SQL text, field mapping) stays in code behind the
//! reader/writer/mapper seams.

use serde::{Deserialize, Serialize};

/// Root plan structure: the full entity graph for one migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Entities in declaration order. Execution order is derived from
    /// `depends_on`, falling back to declaration order between independents.
    pub entities: Vec<EntitySpec>,
}

impl MigrationPlan {
    /// Look up an entity by name.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntitySpec> {
        self.entities.iter().find(|e| e.name == name)
    }
}

/// One migratable entity: a unit of data owned by a single service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySpec {
    /// Entity name, unique within the plan.
    pub name: String,

    /// Registry key of the target store this entity loads into.
    pub store: String,

    /// How target identifiers are produced for this entity's records.
    pub id_strategy: IdStrategy,

    /// Record sets, each feeding one target collection. Most entities have
    /// exactly one; paired entities (e.g. roles and views migrated together
    /// because a join embeds into both) have several.
    pub sets: Vec<RecordSetSpec>,

    /// Relationships to reconstruct after per-row transform.
    #[serde(default)]
    pub relations: Vec<Relation>,

    /// Entities whose migrated data this entity references.
    ///
    /// Declaring a dependency orders execution and widens the reference
    /// closure used by validation; it never couples outcomes. A failed
    /// dependency does not cancel this entity, its own pre-validation
    /// decides.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl EntitySpec {
    /// Look up a record set by name.
    #[must_use]
    pub fn set(&self, name: &str) -> Option<&RecordSetSpec> {
        self.sets.iter().find(|s| s.name == name)
    }
}

/// One record set: a source query feeding one target collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSetSpec {
    /// Set name, unique within the entity.
    pub name: String,

    /// Query identifier handed to the source reader.
    pub query: String,

    /// Target collection name.
    pub collection: String,

    /// Source column carrying the record identifier (default: "id").
    #[serde(default = "default_id_column")]
    pub id_column: String,
}

/// How target identifiers are produced for an entity.
///
/// Always explicit in the plan; the engine never infers a strategy from the
/// store kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Keep source identifiers. Requires a sequence resync after load so
    /// the store's next generated key clears the copied range.
    Preserve,

    /// Fresh integers from a per-set counter starting at 1, in allocation
    /// order.
    GenerateSequence,

    /// Fresh v4 UUIDs.
    GenerateUuid,
}

impl IdStrategy {
    /// Whether this strategy carries source identifiers through unchanged.
    #[must_use]
    pub fn preserves_ids(&self) -> bool {
        matches!(self, IdStrategy::Preserve)
    }
}

/// What to do when a relationship references a record absent from the
/// entity's node set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingRefPolicy {
    /// Keep the record, null the reference, log a warning.
    Warn,
    /// Skip the relationship row entirely, log a warning.
    Drop,
    /// Fail the entity.
    Fail,
}

/// A relationship to reconstruct once all of an entity's nodes exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Relation {
    /// Self-referential binary tree within one record set.
    Tree(TreeRelation),
    /// Many-to-many join embedded as ordered id arrays on both sides.
    Join(JoinRelation),
}

/// Binary tree stored in the source as (parent id, position) per child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeRelation {
    /// The record set the tree lives in.
    pub set: String,

    /// Source column holding the parent's id (NULL for roots).
    #[serde(default = "default_parent_column")]
    pub parent_column: String,

    /// Source column holding the slot position, LEFT or RIGHT.
    #[serde(default = "default_position_column")]
    pub position_column: String,

    /// Target field receiving the child's parent reference.
    #[serde(default = "default_parent_field")]
    pub parent_field: String,

    /// Target field on the parent receiving the left child reference.
    #[serde(default = "default_left_field")]
    pub left_field: String,

    /// Target field on the parent receiving the right child reference.
    #[serde(default = "default_right_field")]
    pub right_field: String,

    /// Policy when a parent id is not present in the node set
    /// (default: warn). `drop` is rejected by plan validation, a tree node
    /// is never discarded over a broken parent link.
    #[serde(default = "default_policy_warn")]
    pub on_missing_parent: MissingRefPolicy,
}

/// Many-to-many join table embedded into both sides as id arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRelation {
    /// Query identifier for the join table rows.
    pub edge_query: String,

    /// Side listed first in the join table.
    pub left: JoinEnd,

    /// Side listed second in the join table.
    pub right: JoinEnd,

    /// Join table column the embedded arrays are ordered by.
    #[serde(default = "default_order_column")]
    pub order_column: String,

    /// Policy when an edge references a record absent from either side
    /// (default: drop). `warn` is rejected by plan validation, an edge
    /// cannot be half-kept.
    #[serde(default = "default_policy_drop")]
    pub on_missing: MissingRefPolicy,
}

/// One side of an embedded join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinEnd {
    /// The record set this side's records live in.
    pub set: String,

    /// Join table column holding this side's old id.
    pub edge_column: String,

    /// Target array field on this side receiving counterpart ids.
    pub array_field: String,
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_parent_column() -> String {
    "parent_id".to_string()
}

fn default_position_column() -> String {
    "position".to_string()
}

fn default_parent_field() -> String {
    "parent_id".to_string()
}

fn default_left_field() -> String {
    "left_child_id".to_string()
}

fn default_right_field() -> String {
    "right_child_id".to_string()
}

fn default_order_column() -> String {
    "sort_order".to_string()
}

fn default_policy_warn() -> MissingRefPolicy {
    MissingRefPolicy::Warn
}

fn default_policy_drop() -> MissingRefPolicy {
    MissingRefPolicy::Drop
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_strategy_serde_names() {
        let yaml = "preserve";
        let s: IdStrategy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(s, IdStrategy::Preserve);
        assert!(s.preserves_ids());

        let s: IdStrategy = serde_yaml::from_str("generate_uuid").unwrap();
        assert_eq!(s, IdStrategy::GenerateUuid);
        assert!(!s.preserves_ids());
    }

    #[test]
    fn test_relation_tagged_deserialization() {
        let yaml = r#"
kind: tree
set: placements
"#;
        let rel: Relation = serde_yaml::from_str(yaml).unwrap();
        match rel {
            Relation::Tree(t) => {
                assert_eq!(t.set, "placements");
                assert_eq!(t.parent_column, "parent_id");
                assert_eq!(t.position_column, "position");
                assert_eq!(t.on_missing_parent, MissingRefPolicy::Warn);
            }
            _ => panic!("expected tree relation"),
        }
    }

    #[test]
    fn test_join_relation_defaults() {
        let yaml = r#"
kind: join
edge_query: role_views
left:
  set: roles
  edge_column: role_id
  array_field: view_ids
right:
  set: views
  edge_column: view_id
  array_field: role_ids
"#;
        let rel: Relation = serde_yaml::from_str(yaml).unwrap();
        match rel {
            Relation::Join(j) => {
                assert_eq!(j.order_column, "sort_order");
                assert_eq!(j.on_missing, MissingRefPolicy::Drop);
                assert_eq!(j.left.array_field, "view_ids");
            }
            _ => panic!("expected join relation"),
        }
    }
}
