//! Binary tree reconstruction.
//!
//! The source stores the tree child-side: each row names its parent and the
//! slot it occupies (LEFT or RIGHT). The target wants it both ways, a
//! parent reference on the child and child references on the parent. The
//! pass first reads every row and plans the links, then applies them, so a
//! child extracted before its parent is no different from one extracted
//! after.

use tracing::{debug, warn};

use crate::config::{MissingRefPolicy, TreeRelation};
use crate::core::{Id, Value};
use crate::error::{MigrateError, Result};

use super::NodeArena;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Left,
    Right,
}

/// Outcome counters for one tree pass.
#[derive(Debug, Default)]
pub struct TreeLinkStats {
    /// Children linked to a parent.
    pub linked: usize,
    /// Nodes with no parent in the source.
    pub roots: usize,
    /// Parent ids absent from the node set (policy permitting).
    pub missing_parents: usize,
    /// Position values outside LEFT/RIGHT.
    pub invalid_positions: usize,
    /// Human-readable warnings for the stage report.
    pub warnings: Vec<String>,
}

struct PlannedLink {
    child: usize,
    parent: usize,
    slot: Option<Slot>,
}

/// Wire up parent and child references within one record set.
///
/// Every record ends up with explicit `parent_field`, `left_field`, and
/// `right_field` values, NULL where no link exists. A parent id that names
/// no node in the arena follows `on_missing_parent`; an invalid position
/// keeps the parent link but claims no slot; a doubly-claimed slot is a
/// structural source violation and fails the entity.
pub fn link_tree(entity: &str, arena: &mut NodeArena, rel: &TreeRelation) -> Result<TreeLinkStats> {
    let mut stats = TreeLinkStats::default();
    let mut links: Vec<PlannedLink> = Vec::new();
    let mut claimed: std::collections::HashMap<(usize, Slot), usize> =
        std::collections::HashMap::new();

    for child in 0..arena.len() {
        let row = arena.row(child);
        let parent_value = row.get(&rel.parent_column);
        let parent_old = match parent_value {
            None => None,
            Some(Value::Null) => None,
            Some(v) => match v.to_id() {
                Some(id) => Some(id),
                None => {
                    return Err(MigrateError::source_data(
                        entity,
                        format!(
                            "set '{}': node {} has a non-identifier value in column '{}'",
                            arena.set(),
                            arena.old_id(child),
                            rel.parent_column
                        ),
                    ));
                }
            },
        };

        let Some(parent_old) = parent_old else {
            stats.roots += 1;
            continue;
        };

        let Some(parent) = arena.lookup(&parent_old) else {
            match rel.on_missing_parent {
                MissingRefPolicy::Fail => {
                    return Err(MigrateError::source_data(
                        entity,
                        format!(
                            "set '{}': node {} references missing parent {}",
                            arena.set(),
                            arena.old_id(child),
                            parent_old
                        ),
                    ));
                }
                _ => {
                    let msg = format!(
                        "set '{}': node {} kept without parent, {} is not in the node set",
                        arena.set(),
                        arena.old_id(child),
                        parent_old
                    );
                    warn!("{}: {}", entity, msg);
                    stats.warnings.push(msg);
                    stats.missing_parents += 1;
                    stats.roots += 1;
                    continue;
                }
            }
        };

        if parent == child {
            return Err(MigrateError::source_data(
                entity,
                format!(
                    "set '{}': node {} is its own parent",
                    arena.set(),
                    arena.old_id(child)
                ),
            ));
        }

        let slot = match row.text(&rel.position_column).map(str::trim) {
            Some(p) if p.eq_ignore_ascii_case("LEFT") => Some(Slot::Left),
            Some(p) if p.eq_ignore_ascii_case("RIGHT") => Some(Slot::Right),
            other => {
                let msg = format!(
                    "set '{}': node {} has position {:?}, parent link kept without a slot",
                    arena.set(),
                    arena.old_id(child),
                    other.unwrap_or("<missing>")
                );
                warn!("{}: {}", entity, msg);
                stats.warnings.push(msg);
                stats.invalid_positions += 1;
                None
            }
        };

        if let Some(slot) = slot {
            if let Some(&other) = claimed.get(&(parent, slot)) {
                return Err(MigrateError::source_data(
                    entity,
                    format!(
                        "set '{}': nodes {} and {} both claim the {:?} slot of parent {}",
                        arena.set(),
                        arena.old_id(other),
                        arena.old_id(child),
                        slot,
                        parent_old
                    ),
                ));
            }
            claimed.insert((parent, slot), child);
        }

        links.push(PlannedLink {
            child,
            parent,
            slot,
        });
    }

    // Apply phase: every slot explicit, then the planned links.
    let ids: Vec<Id> = arena.record_ids();
    for pos in 0..arena.len() {
        let record = arena.record_mut(pos);
        record.set(rel.parent_field.clone(), Value::Null);
        record.set(rel.left_field.clone(), Value::Null);
        record.set(rel.right_field.clone(), Value::Null);
    }
    for link in &links {
        arena
            .record_mut(link.child)
            .set_ref(rel.parent_field.clone(), ids[link.parent].clone());
        if let Some(slot) = link.slot {
            let field = match slot {
                Slot::Left => rel.left_field.clone(),
                Slot::Right => rel.right_field.clone(),
            };
            arena
                .record_mut(link.parent)
                .set_ref(field, ids[link.child].clone());
        }
        stats.linked += 1;
    }

    debug!(
        "{}: tree pass over set '{}': {} linked, {} roots, {} missing parents",
        entity,
        arena.set(),
        stats.linked,
        stats.roots,
        stats.missing_parents
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SourceRow, TargetRecord};

    fn tree_rel(policy: MissingRefPolicy) -> TreeRelation {
        TreeRelation {
            set: "placements".to_string(),
            parent_column: "parent_id".to_string(),
            position_column: "position".to_string(),
            parent_field: "parent_id".to_string(),
            left_field: "left_child_id".to_string(),
            right_field: "right_child_id".to_string(),
            on_missing_parent: policy,
        }
    }

    fn node(arena: &mut NodeArena, old: i64, new: i64, parent: Option<i64>, position: &str) {
        let row = SourceRow::from_pairs([
            ("id", Value::Int(old)),
            ("parent_id", parent.map(Value::Int).unwrap_or(Value::Null)),
            (
                "position",
                if position.is_empty() {
                    Value::Null
                } else {
                    Value::Text(position.to_string())
                },
            ),
        ]);
        arena.push(Id::Int(old), row, TargetRecord::new(Id::Int(new)));
    }

    #[test]
    fn test_parent_and_children_are_mutually_consistent() {
        let mut arena = NodeArena::new("placements");
        node(&mut arena, 1, 11, None, "");
        node(&mut arena, 2, 12, Some(1), "LEFT");
        node(&mut arena, 3, 13, Some(1), "RIGHT");

        let rel = tree_rel(MissingRefPolicy::Warn);
        let stats = link_tree("placements", &mut arena, &rel).unwrap();

        assert_eq!(stats.linked, 2);
        assert_eq!(stats.roots, 1);
        assert!(stats.warnings.is_empty());

        let root = arena.record(0);
        assert_eq!(root.get("parent_id"), Some(&Value::Null));
        assert_eq!(root.get("left_child_id"), Some(&Value::Ref(Id::Int(12))));
        assert_eq!(root.get("right_child_id"), Some(&Value::Ref(Id::Int(13))));

        let left = arena.record(1);
        assert_eq!(left.get("parent_id"), Some(&Value::Ref(Id::Int(11))));
        assert_eq!(left.get("left_child_id"), Some(&Value::Null));

        let right = arena.record(2);
        assert_eq!(right.get("parent_id"), Some(&Value::Ref(Id::Int(11))));
    }

    #[test]
    fn test_extraction_order_does_not_matter() {
        // Children first, parent last.
        let mut arena = NodeArena::new("placements");
        node(&mut arena, 2, 12, Some(1), "LEFT");
        node(&mut arena, 3, 13, Some(1), "RIGHT");
        node(&mut arena, 1, 11, None, "");

        let rel = tree_rel(MissingRefPolicy::Warn);
        let stats = link_tree("placements", &mut arena, &rel).unwrap();
        assert_eq!(stats.linked, 2);

        let parent_pos = arena.lookup(&Id::Int(1)).unwrap();
        let parent = arena.record(parent_pos);
        assert_eq!(parent.get("left_child_id"), Some(&Value::Ref(Id::Int(12))));
        assert_eq!(parent.get("right_child_id"), Some(&Value::Ref(Id::Int(13))));
    }

    #[test]
    fn test_missing_parent_warns_and_keeps_node() {
        let mut arena = NodeArena::new("placements");
        node(&mut arena, 2, 12, Some(99), "LEFT");

        let rel = tree_rel(MissingRefPolicy::Warn);
        let stats = link_tree("placements", &mut arena, &rel).unwrap();

        assert_eq!(stats.missing_parents, 1);
        assert_eq!(stats.warnings.len(), 1);
        assert_eq!(arena.record(0).get("parent_id"), Some(&Value::Null));
    }

    #[test]
    fn test_missing_parent_fails_under_fail_policy() {
        let mut arena = NodeArena::new("placements");
        node(&mut arena, 2, 12, Some(99), "LEFT");

        let rel = tree_rel(MissingRefPolicy::Fail);
        let err = link_tree("placements", &mut arena, &rel).unwrap_err();
        assert!(matches!(err, MigrateError::SourceData { .. }));
    }

    #[test]
    fn test_invalid_position_keeps_parent_link_only() {
        let mut arena = NodeArena::new("placements");
        node(&mut arena, 1, 11, None, "");
        node(&mut arena, 2, 12, Some(1), "MIDDLE");

        let rel = tree_rel(MissingRefPolicy::Warn);
        let stats = link_tree("placements", &mut arena, &rel).unwrap();

        assert_eq!(stats.invalid_positions, 1);
        assert_eq!(stats.linked, 1);
        let child = arena.record(1);
        assert_eq!(child.get("parent_id"), Some(&Value::Ref(Id::Int(11))));
        let parent = arena.record(0);
        assert_eq!(parent.get("left_child_id"), Some(&Value::Null));
        assert_eq!(parent.get("right_child_id"), Some(&Value::Null));
    }

    #[test]
    fn test_duplicate_slot_claim_is_structural_error() {
        let mut arena = NodeArena::new("placements");
        node(&mut arena, 1, 11, None, "");
        node(&mut arena, 2, 12, Some(1), "LEFT");
        node(&mut arena, 3, 13, Some(1), "left");

        let rel = tree_rel(MissingRefPolicy::Warn);
        let err = link_tree("placements", &mut arena, &rel).unwrap_err();
        assert!(format!("{}", err).contains("both claim"));
    }

    #[test]
    fn test_self_parent_is_structural_error() {
        let mut arena = NodeArena::new("placements");
        node(&mut arena, 1, 11, Some(1), "LEFT");

        let rel = tree_rel(MissingRefPolicy::Warn);
        let err = link_tree("placements", &mut arena, &rel).unwrap_err();
        assert!(format!("{}", err).contains("its own parent"));
    }
}
