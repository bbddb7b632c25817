//! Dependency ordering of entity migrations.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::error::{MigrateError, Result};
use crate::mapping::{EntityKey, MappingRegistry};

/// Order every registered entity after all of its dependencies.
///
/// Depth-first over the registry in declaration order. Dependencies that are
/// not registered are skipped with a warning. A cycle is rejected with the
/// entities that form it, e.g. `user -> role -> user`.
pub fn resolve_order(registry: &MappingRegistry) -> Result<Vec<EntityKey>> {
    let mut order = Vec::with_capacity(registry.len());
    let mut visited = HashSet::new();
    let mut in_progress = Vec::new();

    for key in registry.keys() {
        visit(*key, registry, &mut visited, &mut in_progress, &mut order)?;
    }

    Ok(order)
}

fn visit(
    key: EntityKey,
    registry: &MappingRegistry,
    visited: &mut HashSet<EntityKey>,
    in_progress: &mut Vec<EntityKey>,
    order: &mut Vec<EntityKey>,
) -> Result<()> {
    if visited.contains(&key) {
        return Ok(());
    }
    if let Some(pos) = in_progress.iter().position(|k| *k == key) {
        let mut cycle: Vec<String> = in_progress[pos..].iter().map(|k| k.to_string()).collect();
        cycle.push(key.to_string());
        return Err(MigrateError::CyclicDependency { cycle });
    }
    let Some(mapping) = registry.get(key) else {
        return Ok(());
    };

    in_progress.push(key);
    for dep in &mapping.dependencies {
        if !registry.contains(*dep) {
            warn!(
                "{}: dependency '{}' is not in the registry, ignoring it",
                key, dep
            );
            continue;
        }
        visit(*dep, registry, visited, in_progress, order)?;
    }
    in_progress.pop();

    visited.insert(key);
    order.push(key);
    Ok(())
}

/// Keep only the selected entities, preserving resolved order.
///
/// An empty selection keeps everything. Selected entities whose dependencies
/// are left out are assumed to have been migrated already.
pub fn select(order: &[EntityKey], selection: &[EntityKey]) -> Vec<EntityKey> {
    if selection.is_empty() {
        return order.to_vec();
    }
    order
        .iter()
        .copied()
        .filter(|k| selection.contains(k))
        .collect()
}

/// Group an ordered list into levels: every entity sits one level above the
/// deepest of its dependencies within the list, so entities of one level
/// share no dependency edge.
pub fn dependency_levels(registry: &MappingRegistry, order: &[EntityKey]) -> Vec<Vec<EntityKey>> {
    let mut level_of: HashMap<EntityKey, usize> = HashMap::new();
    let mut levels: Vec<Vec<EntityKey>> = Vec::new();

    for key in order {
        let level = registry
            .get(*key)
            .map(|m| {
                m.dependencies
                    .iter()
                    .filter_map(|d| level_of.get(d))
                    .map(|l| l + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        level_of.insert(*key, level);
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(*key);
    }

    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MigrationMapping;
    use EntityKey::*;

    fn registry(edges: &[(EntityKey, &[EntityKey])]) -> MappingRegistry {
        let mappings = edges
            .iter()
            .map(|(k, deps)| MigrationMapping::new(*k, k.as_str()).depends_on(deps))
            .collect();
        MappingRegistry::new(mappings, vec![]).unwrap()
    }

    fn assert_topological(registry: &MappingRegistry, order: &[EntityKey]) {
        let pos: HashMap<_, _> = order.iter().enumerate().map(|(i, k)| (*k, i)).collect();
        for mapping in registry.mappings() {
            for dep in &mapping.dependencies {
                if let Some(dep_pos) = pos.get(dep) {
                    assert!(
                        *dep_pos < pos[&mapping.key],
                        "{} must come before {}",
                        dep,
                        mapping.key
                    );
                }
            }
        }
    }

    #[test]
    fn test_dependencies_come_first() {
        let reg = registry(&[
            (Answer, &[Question]),
            (Question, &[Video]),
            (Video, &[TvShow, File]),
            (TvShow, &[File]),
            (File, &[]),
        ]);
        let order = resolve_order(&reg).unwrap();
        assert_eq!(order, vec![File, TvShow, Video, Question, Answer]);
        assert_topological(&reg, &order);
    }

    #[test]
    fn test_portal_order_is_topological() {
        let reg = MappingRegistry::portal().unwrap();
        let order = resolve_order(&reg).unwrap();
        assert_eq!(order.len(), reg.len());
        assert_topological(&reg, &order);
        // Declaration order is kept where dependencies allow it.
        assert_eq!(order[0], Role);
    }

    #[test]
    fn test_cycle_is_rejected_with_names() {
        let reg = registry(&[(User, &[Role]), (Role, &[Institution]), (Institution, &[User])]);
        let err = resolve_order(&reg).unwrap_err();
        match err {
            MigrateError::CyclicDependency { cycle } => {
                assert_eq!(cycle, vec!["user", "role", "institution", "user"]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let reg = registry(&[(Tag, &[Tag])]);
        assert!(matches!(
            resolve_order(&reg),
            Err(MigrateError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_unregistered_dependency_is_ignored() {
        let reg = registry(&[(User, &[Role, Institution]), (Role, &[])]);
        let order = resolve_order(&reg).unwrap();
        assert_eq!(order, vec![Role, User]);
    }

    #[test]
    fn test_select_keeps_order() {
        let order = vec![Role, Institution, User, Unit];
        assert_eq!(select(&order, &[Unit, Role]), vec![Role, Unit]);
        assert_eq!(select(&order, &[]), order);
    }

    #[test]
    fn test_dependency_levels() {
        let reg = registry(&[
            (Role, &[]),
            (Institution, &[]),
            (User, &[Role, Institution]),
            (Unit, &[Institution]),
            (UnitClass, &[Unit]),
        ]);
        let order = resolve_order(&reg).unwrap();
        let levels = dependency_levels(&reg, &order);
        assert_eq!(
            levels,
            vec![vec![Role, Institution], vec![User, Unit], vec![UnitClass]]
        );
    }

    #[test]
    fn test_levels_ignore_dependencies_outside_selection() {
        let reg = registry(&[(Institution, &[]), (Unit, &[Institution]), (UnitClass, &[Unit])]);
        let levels = dependency_levels(&reg, &[Unit, UnitClass]);
        assert_eq!(levels, vec![vec![Unit], vec![UnitClass]]);
    }
}
