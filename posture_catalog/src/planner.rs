//! # Dependency Planner
//!
//! Orders discovery steps so that every `for_each` parent (and every
//! `depends_on` target) runs before its dependents.
//!
//! An edge A -> B exists iff B declares `for_each: A` or lists A in
//! `depends_on`. The order is computed with Kahn's algorithm, level by level,
//! with alphabetical tie-breaking so plans are deterministic. Each level is a
//! wave: members of a wave depend only on earlier waves and may run
//! concurrently.

use crate::error::PlanValidationError;
use crate::model::DiscoveryDef;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Validated execution order for a catalog's discoveries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPlan {
    /// Flattened topological order
    pub order: Vec<String>,
    /// Independent groups in execution order
    pub waves: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Position of a discovery in the flattened order
    pub fn position(&self, id: &str) -> Option<usize> {
        self.order.iter().position(|o| o == id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Build and validate the execution plan
pub fn plan(discoveries: &[DiscoveryDef]) -> Result<ExecutionPlan, PlanValidationError> {
    let mut ids: BTreeSet<&str> = BTreeSet::new();
    for discovery in discoveries {
        if !ids.insert(discovery.id.as_str()) {
            return Err(PlanValidationError::DuplicateId {
                id: discovery.id.clone(),
            });
        }
    }

    // dependencies: node -> the nodes it waits on
    let mut dependencies: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for discovery in discoveries {
        let id = discovery.id.as_str();
        let mut deps = BTreeSet::new();

        for reference in discovery
            .for_each
            .iter()
            .chain(discovery.depends_on.iter())
        {
            if reference == id {
                return Err(PlanValidationError::SelfReference {
                    id: discovery.id.clone(),
                });
            }
            if !ids.contains(reference.as_str()) {
                return Err(PlanValidationError::DanglingReference {
                    id: discovery.id.clone(),
                    reference: reference.clone(),
                });
            }
            deps.insert(reference.as_str());
        }
        dependencies.insert(id, deps);
    }

    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    for (id, deps) in &dependencies {
        in_degree.insert(*id, deps.len());
        for dep in deps {
            dependents.entry(*dep).or_default().push(*id);
        }
    }

    let mut waves: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();

    while !current.is_empty() {
        current.sort_unstable();
        let mut next: Vec<&str> = Vec::new();

        for id in &current {
            if let Some(children) = dependents.get(id) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*child);
                        }
                    }
                }
            }
        }

        waves.push(current.iter().map(|s| s.to_string()).collect());
        current = next;
    }

    let order: Vec<String> = waves.iter().flatten().cloned().collect();
    if order.len() != dependencies.len() {
        let ordered: HashSet<&str> = order.iter().map(|s| s.as_str()).collect();
        return Err(PlanValidationError::Cycle {
            path: find_cycle(&dependencies, &ordered),
        });
    }

    log::debug!(
        "Planned {} discoveries in {} waves",
        order.len(),
        waves.len()
    );

    Ok(ExecutionPlan { order, waves })
}

/// Walk unresolved dependencies until a node repeats.
///
/// Every node left over by Kahn's algorithm waits on at least one other
/// leftover node, so the walk always closes a loop.
fn find_cycle(
    dependencies: &BTreeMap<&str, BTreeSet<&str>>,
    ordered: &HashSet<&str>,
) -> Vec<String> {
    let remaining: Vec<&str> = dependencies
        .keys()
        .copied()
        .filter(|id| !ordered.contains(id))
        .collect();

    let Some(&start) = remaining.first() else {
        return Vec::new();
    };

    let mut path: Vec<&str> = vec![start];
    let mut current = start;
    loop {
        let next = dependencies
            .get(current)
            .and_then(|deps| deps.iter().find(|d| !ordered.contains(*d)).copied());

        let Some(next) = next else {
            return path.iter().map(|s| s.to_string()).collect();
        };

        if let Some(pos) = path.iter().position(|p| *p == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.to_string());
            return cycle;
        }

        path.push(next);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn discovery(id: &str, for_each: Option<&str>, depends_on: &[&str]) -> DiscoveryDef {
        DiscoveryDef {
            id: id.to_string(),
            calls: Vec::new(),
            for_each: for_each.map(str::to_string),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            emit: None,
            on_error: None,
            id_field: None,
        }
    }

    #[test]
    fn test_linear_chain() {
        let defs = vec![
            discovery("c", Some("b"), &[]),
            discovery("b", Some("a"), &[]),
            discovery("a", None, &[]),
        ];
        let plan = plan(&defs).unwrap();
        assert_eq!(plan.order, vec!["a", "b", "c"]);
        assert_eq!(plan.waves.len(), 3);
    }

    #[test]
    fn test_independent_roots_share_a_wave() {
        let defs = vec![
            discovery("networks", None, &[]),
            discovery("buckets", None, &[]),
            discovery("bucket_iam", Some("buckets"), &[]),
        ];
        let plan = plan(&defs).unwrap();
        assert_eq!(plan.waves[0], vec!["buckets", "networks"]);
        assert_eq!(plan.waves[1], vec!["bucket_iam"]);
    }

    #[test]
    fn test_diamond_respects_every_edge() {
        let defs = vec![
            discovery("top", None, &[]),
            discovery("left", Some("top"), &[]),
            discovery("right", Some("top"), &[]),
            discovery("bottom", Some("left"), &["right"]),
        ];
        let plan = plan(&defs).unwrap();
        for def in &defs {
            let pos = plan.position(&def.id).unwrap();
            for dep in def.for_each.iter().chain(def.depends_on.iter()) {
                assert!(plan.position(dep).unwrap() < pos, "{} before {}", dep, def.id);
            }
        }
        assert_eq!(plan.order.last().map(String::as_str), Some("bottom"));
    }

    #[test]
    fn test_two_node_cycle() {
        let defs = vec![
            discovery("a", Some("b"), &[]),
            discovery("b", Some("a"), &[]),
        ];
        let err = plan(&defs).unwrap_err();
        match err {
            PlanValidationError::Cycle { path } => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 3);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_behind_valid_nodes() {
        let defs = vec![
            discovery("root", None, &[]),
            discovery("x", Some("z"), &[]),
            discovery("y", Some("x"), &[]),
            discovery("z", Some("y"), &["root"]),
            discovery("tail", Some("z"), &[]),
        ];
        assert_matches!(plan(&defs), Err(PlanValidationError::Cycle { path }) if path.len() == 4);
    }

    #[test]
    fn test_dangling_reference() {
        let defs = vec![discovery("child", Some("missing"), &[])];
        assert_matches!(
            plan(&defs),
            Err(PlanValidationError::DanglingReference { reference, .. }) if reference == "missing"
        );
    }

    #[test]
    fn test_self_reference() {
        let defs = vec![discovery("loop", Some("loop"), &[])];
        assert_matches!(plan(&defs), Err(PlanValidationError::SelfReference { .. }));
    }

    #[test]
    fn test_duplicate_id() {
        let defs = vec![discovery("a", None, &[]), discovery("a", None, &[])];
        assert_matches!(plan(&defs), Err(PlanValidationError::DuplicateId { .. }));
    }
}
