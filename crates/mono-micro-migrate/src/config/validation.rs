//! Migration plan validation.

use std::collections::{HashMap, HashSet};

use super::{MigrationPlan, MissingRefPolicy, Relation};
use crate::error::{MigrateError, Result};

/// Validate the plan structure.
///
/// Catches everything that can be caught before touching a store: duplicate
/// names, dangling set and dependency references, dependency cycles, and
/// policies that make no sense for their relation kind.
pub fn validate(plan: &MigrationPlan) -> Result<()> {
    if plan.entities.is_empty() {
        return Err(MigrateError::Config("plan has no entities".into()));
    }

    let mut entity_names = HashSet::new();
    for entity in &plan.entities {
        if entity.name.is_empty() {
            return Err(MigrateError::Config("entity name is required".into()));
        }
        if !entity_names.insert(entity.name.as_str()) {
            return Err(MigrateError::Config(format!(
                "duplicate entity name '{}'",
                entity.name
            )));
        }
        if entity.store.is_empty() {
            return Err(MigrateError::Config(format!(
                "entity '{}': store is required",
                entity.name
            )));
        }
        if entity.sets.is_empty() {
            return Err(MigrateError::Config(format!(
                "entity '{}': at least one record set is required",
                entity.name
            )));
        }

        let mut set_names = HashSet::new();
        let mut collections = HashSet::new();
        for set in &entity.sets {
            if set.name.is_empty() || set.query.is_empty() || set.collection.is_empty() {
                return Err(MigrateError::Config(format!(
                    "entity '{}': record sets need name, query, and collection",
                    entity.name
                )));
            }
            if set.id_column.is_empty() {
                return Err(MigrateError::Config(format!(
                    "entity '{}', set '{}': id_column is required",
                    entity.name, set.name
                )));
            }
            if !set_names.insert(set.name.as_str()) {
                return Err(MigrateError::Config(format!(
                    "entity '{}': duplicate set name '{}'",
                    entity.name, set.name
                )));
            }
            if !collections.insert(set.collection.as_str()) {
                return Err(MigrateError::Config(format!(
                    "entity '{}': collection '{}' used by more than one set",
                    entity.name, set.collection
                )));
            }
        }

        for relation in &entity.relations {
            validate_relation(&entity.name, &set_names, relation)?;
        }
    }

    for entity in &plan.entities {
        let mut seen_deps = HashSet::new();
        for dep in &entity.depends_on {
            if dep == &entity.name {
                return Err(MigrateError::Config(format!(
                    "entity '{}' depends on itself",
                    entity.name
                )));
            }
            if !entity_names.contains(dep.as_str()) {
                return Err(MigrateError::Config(format!(
                    "entity '{}' depends on unknown entity '{}'",
                    entity.name, dep
                )));
            }
            if !seen_deps.insert(dep.as_str()) {
                return Err(MigrateError::Config(format!(
                    "entity '{}' lists dependency '{}' twice",
                    entity.name, dep
                )));
            }
        }
    }

    check_cycles(plan)
}

fn validate_relation(
    entity: &str,
    set_names: &HashSet<&str>,
    relation: &Relation,
) -> Result<()> {
    match relation {
        Relation::Tree(tree) => {
            if !set_names.contains(tree.set.as_str()) {
                return Err(MigrateError::Config(format!(
                    "entity '{}': tree relation references unknown set '{}'",
                    entity, tree.set
                )));
            }
            if tree.left_field == tree.right_field {
                return Err(MigrateError::Config(format!(
                    "entity '{}': tree left_field and right_field must differ",
                    entity
                )));
            }
            if tree.on_missing_parent == MissingRefPolicy::Drop {
                return Err(MigrateError::Config(format!(
                    "entity '{}': on_missing_parent cannot be 'drop', use 'warn' or 'fail'",
                    entity
                )));
            }
        }
        Relation::Join(join) => {
            if join.edge_query.is_empty() {
                return Err(MigrateError::Config(format!(
                    "entity '{}': join relation needs an edge_query",
                    entity
                )));
            }
            for end in [&join.left, &join.right] {
                if !set_names.contains(end.set.as_str()) {
                    return Err(MigrateError::Config(format!(
                        "entity '{}': join relation references unknown set '{}'",
                        entity, end.set
                    )));
                }
            }
            if join.left.set == join.right.set {
                return Err(MigrateError::Config(format!(
                    "entity '{}': join relation sides must be distinct sets",
                    entity
                )));
            }
            if join.on_missing == MissingRefPolicy::Warn {
                return Err(MigrateError::Config(format!(
                    "entity '{}': on_missing cannot be 'warn' for a join, use 'drop' or 'fail'",
                    entity
                )));
            }
        }
    }
    Ok(())
}

/// Reject dependency cycles with the names of the entities involved.
fn check_cycles(plan: &MigrationPlan) -> Result<()> {
    let mut in_degree: HashMap<&str, usize> = plan
        .entities
        .iter()
        .map(|e| (e.name.as_str(), e.depends_on.len()))
        .collect();

    loop {
        let ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        if ready.is_empty() {
            break;
        }
        for name in ready {
            in_degree.remove(name);
            for entity in &plan.entities {
                if entity.depends_on.iter().any(|d| d == name) {
                    if let Some(d) = in_degree.get_mut(entity.name.as_str()) {
                        *d -= 1;
                    }
                }
            }
        }
    }

    if in_degree.is_empty() {
        Ok(())
    } else {
        let mut stuck: Vec<&str> = in_degree.keys().copied().collect();
        stuck.sort_unstable();
        Err(MigrateError::Config(format!(
            "dependency cycle involving: {}",
            stuck.join(", ")
        )))
    }
}
