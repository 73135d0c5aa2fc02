//! Many-to-many join embedding.
//!
//! The source keeps the relationship in a join table; the target document
//! store wants it denormalized as an ordered id array on **both** sides.
//! Edges are applied in join-order, so each side's array comes out sorted
//! by the join table's order column, with ties keeping extraction order.

use tracing::{debug, warn};

use crate::config::{JoinRelation, MissingRefPolicy};
use crate::core::{SourceRow, Value};
use crate::error::{MigrateError, Result};

use super::NodeArena;

/// Outcome counters for one join pass.
#[derive(Debug, Default)]
pub struct JoinEmbedStats {
    /// Edges embedded into both sides.
    pub embedded: usize,
    /// Edges skipped because one side was missing (policy permitting).
    pub dropped: usize,
    /// Human-readable warnings for the stage report.
    pub warnings: Vec<String>,
}

/// Embed a join table into the record arrays of both sides.
///
/// Every record of both sets ends up with its array field present, empty
/// when nothing joins to it. An edge naming a record absent from either
/// arena follows `on_missing`: skipped with a warning, or failing the
/// entity. A skipped edge is skipped on both sides, a one-sided embedding
/// is never produced.
pub fn embed_join(
    entity: &str,
    left: &mut NodeArena,
    right: &mut NodeArena,
    edges: &[SourceRow],
    rel: &JoinRelation,
) -> Result<JoinEmbedStats> {
    let mut stats = JoinEmbedStats::default();

    for pos in 0..left.len() {
        left.record_mut(pos)
            .set(rel.left.array_field.clone(), Value::RefList(Vec::new()));
    }
    for pos in 0..right.len() {
        right
            .record_mut(pos)
            .set(rel.right.array_field.clone(), Value::RefList(Vec::new()));
    }

    let mut parsed = Vec::with_capacity(edges.len());
    for (row_no, edge) in edges.iter().enumerate() {
        let left_old = edge.id_value(&rel.left.edge_column).ok_or_else(|| {
            MigrateError::source_data(
                entity,
                format!(
                    "edge row {}: column '{}' does not hold an identifier",
                    row_no, rel.left.edge_column
                ),
            )
        })?;
        let right_old = edge.id_value(&rel.right.edge_column).ok_or_else(|| {
            MigrateError::source_data(
                entity,
                format!(
                    "edge row {}: column '{}' does not hold an identifier",
                    row_no, rel.right.edge_column
                ),
            )
        })?;
        let order = edge.int(&rel.order_column).ok_or_else(|| {
            MigrateError::source_data(
                entity,
                format!(
                    "edge row {}: column '{}' does not hold an integer order",
                    row_no, rel.order_column
                ),
            )
        })?;
        parsed.push((order, left_old, right_old));
    }

    // Stable sort: equal order values keep their extraction order.
    parsed.sort_by_key(|(order, _, _)| *order);

    for (_, left_old, right_old) in parsed {
        let (Some(li), Some(ri)) = (left.lookup(&left_old), right.lookup(&right_old)) else {
            if rel.on_missing == MissingRefPolicy::Fail {
                return Err(MigrateError::source_data(
                    entity,
                    format!(
                        "edge ({}, {}) references a record missing from set '{}' or '{}'",
                        left_old,
                        right_old,
                        rel.left.set,
                        rel.right.set
                    ),
                ));
            }
            let msg = format!(
                "edge ({}, {}) dropped, one side is not in its node set",
                left_old, right_old
            );
            warn!("{}: {}", entity, msg);
            stats.warnings.push(msg);
            stats.dropped += 1;
            continue;
        };

        let left_id = left.record(li).id().clone();
        let right_id = right.record(ri).id().clone();
        left.record_mut(li).push_ref(&rel.left.array_field, right_id);
        right.record_mut(ri).push_ref(&rel.right.array_field, left_id);
        stats.embedded += 1;
    }

    debug!(
        "{}: join pass '{}': {} embedded, {} dropped",
        entity, rel.edge_query, stats.embedded, stats.dropped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JoinEnd;
    use crate::core::{Id, TargetRecord};
    use uuid::Uuid;

    fn join_rel(policy: MissingRefPolicy) -> JoinRelation {
        JoinRelation {
            edge_query: "role_views".to_string(),
            left: JoinEnd {
                set: "roles".to_string(),
                edge_column: "role_id".to_string(),
                array_field: "view_ids".to_string(),
            },
            right: JoinEnd {
                set: "views".to_string(),
                edge_column: "view_id".to_string(),
                array_field: "role_ids".to_string(),
            },
            order_column: "sort_order".to_string(),
            on_missing: policy,
        }
    }

    fn edge(role: i64, view: i64, order: i64) -> SourceRow {
        SourceRow::from_pairs([
            ("role_id", Value::Int(role)),
            ("view_id", Value::Int(view)),
            ("sort_order", Value::Int(order)),
        ])
    }

    fn arena_with(set: &str, olds: &[i64]) -> (NodeArena, Vec<Id>) {
        let mut arena = NodeArena::new(set);
        let mut new_ids = Vec::new();
        for old in olds {
            let new_id = Id::Uuid(Uuid::new_v4());
            new_ids.push(new_id.clone());
            arena.push(
                Id::Int(*old),
                SourceRow::from_pairs([("id", Value::Int(*old))]),
                TargetRecord::new(new_id),
            );
        }
        (arena, new_ids)
    }

    #[test]
    fn test_arrays_ordered_by_join_order() {
        let (mut roles, role_ids) = arena_with("roles", &[1]);
        let (mut views, view_ids) = arena_with("views", &[10, 20]);

        // Role 1 joins view 10 at order 2 and view 20 at order 1.
        let edges = vec![edge(1, 10, 2), edge(1, 20, 1)];
        let rel = join_rel(MissingRefPolicy::Drop);
        let stats = embed_join("roles_views", &mut roles, &mut views, &edges, &rel).unwrap();

        assert_eq!(stats.embedded, 2);
        assert_eq!(
            roles.record(0).ref_list("view_ids"),
            &[view_ids[1].clone(), view_ids[0].clone()]
        );
        assert_eq!(views.record(0).ref_list("role_ids"), &[role_ids[0].clone()]);
        assert_eq!(views.record(1).ref_list("role_ids"), &[role_ids[0].clone()]);
    }

    #[test]
    fn test_unjoined_records_get_empty_arrays() {
        let (mut roles, _) = arena_with("roles", &[1, 2]);
        let (mut views, _) = arena_with("views", &[10]);

        let edges = vec![edge(1, 10, 1)];
        let rel = join_rel(MissingRefPolicy::Drop);
        embed_join("roles_views", &mut roles, &mut views, &edges, &rel).unwrap();

        assert_eq!(roles.record(1).ref_list("view_ids"), &[] as &[Id]);
        assert!(matches!(
            roles.record(1).get("view_ids"),
            Some(Value::RefList(_))
        ));
    }

    #[test]
    fn test_dangling_edge_is_dropped_on_both_sides() {
        let (mut roles, _) = arena_with("roles", &[1]);
        let (mut views, _) = arena_with("views", &[10]);

        let edges = vec![edge(1, 99, 1), edge(1, 10, 2)];
        let rel = join_rel(MissingRefPolicy::Drop);
        let stats = embed_join("roles_views", &mut roles, &mut views, &edges, &rel).unwrap();

        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.embedded, 1);
        assert_eq!(stats.warnings.len(), 1);
        assert_eq!(roles.record(0).ref_list("view_ids").len(), 1);
        assert_eq!(views.record(0).ref_list("role_ids").len(), 1);
    }

    #[test]
    fn test_dangling_edge_fails_under_fail_policy() {
        let (mut roles, _) = arena_with("roles", &[1]);
        let (mut views, _) = arena_with("views", &[10]);

        let edges = vec![edge(7, 10, 1)];
        let rel = join_rel(MissingRefPolicy::Fail);
        let err =
            embed_join("roles_views", &mut roles, &mut views, &edges, &rel).unwrap_err();
        assert!(matches!(err, MigrateError::SourceData { .. }));
    }

    #[test]
    fn test_equal_order_keeps_extraction_order() {
        let (mut roles, _) = arena_with("roles", &[1]);
        let (mut views, view_ids) = arena_with("views", &[10, 20, 30]);

        let edges = vec![edge(1, 30, 1), edge(1, 10, 1), edge(1, 20, 1)];
        let rel = join_rel(MissingRefPolicy::Drop);
        embed_join("roles_views", &mut roles, &mut views, &edges, &rel).unwrap();

        assert_eq!(
            roles.record(0).ref_list("view_ids"),
            &[
                view_ids[2].clone(),
                view_ids[0].clone(),
                view_ids[1].clone()
            ]
        );
    }
}
