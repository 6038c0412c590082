//! Structural validation and ordering.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::error::GraphError;
use crate::step::Step;

/// Minimal graph view: node name plus its dependency names. Ordering
/// helpers work on this shape so persisted graphs (deps reconstructed from
/// the run log) can reuse them without step functions.
pub type NodeDeps = (String, Vec<String>);

pub(crate) fn node_deps_of(steps: &[Step]) -> Vec<NodeDeps> {
    steps
        .iter()
        .map(|step| (step.name().to_string(), step.deps().to_vec()))
        .collect()
}

/// Check every dependency resolves and the graph is acyclic.
pub fn validate_steps(steps: &[Step]) -> Result<(), GraphError> {
    let names: HashSet<&str> = steps.iter().map(Step::name).collect();
    for step in steps {
        for dep in step.deps() {
            if !names.contains(dep.as_str()) {
                return Err(GraphError::UnknownDependency {
                    step: step.name().to_string(),
                    dep: dep.clone(),
                });
            }
        }
    }

    // Three-color DFS: `temp` marks the current path, `perm` finished nodes.
    let by_name: HashMap<&str, &Step> = steps.iter().map(|s| (s.name(), s)).collect();
    let mut temp: HashSet<&str> = HashSet::new();
    let mut perm: HashSet<&str> = HashSet::new();
    for step in steps {
        visit(step.name(), &by_name, &mut temp, &mut perm)?;
    }
    Ok(())
}

fn visit<'a>(
    node: &'a str,
    by_name: &HashMap<&'a str, &'a Step>,
    temp: &mut HashSet<&'a str>,
    perm: &mut HashSet<&'a str>,
) -> Result<(), GraphError> {
    if perm.contains(node) {
        return Ok(());
    }
    if !temp.insert(node) {
        return Err(GraphError::Cycle {
            step: node.to_string(),
        });
    }
    if let Some(step) = by_name.get(node) {
        for dep in step.deps() {
            visit(dep, by_name, temp, perm)?;
        }
    }
    temp.remove(node);
    perm.insert(node);
    Ok(())
}

/// Topological order by indegree-zero extraction, stable by insertion order.
pub fn topological_order(steps: &[Step]) -> Result<Vec<String>, GraphError> {
    topo_pairs(&node_deps_of(steps))
}

pub(crate) fn topo_pairs(nodes: &[NodeDeps]) -> Result<Vec<String>, GraphError> {
    let mut indegree: HashMap<&str, usize> = nodes
        .iter()
        .map(|(name, deps)| (name.as_str(), deps.len()))
        .collect();

    let mut queue: VecDeque<&str> = nodes
        .iter()
        .filter(|(name, _)| indegree[name.as_str()] == 0)
        .map(|(name, _)| name.as_str())
        .collect();
    let mut order: Vec<String> = Vec::with_capacity(nodes.len());

    while let Some(node) = queue.pop_front() {
        order.push(node.to_string());
        for (name, deps) in nodes {
            if deps.iter().any(|dep| dep == node)
                && let Some(entry) = indegree.get_mut(name.as_str())
            {
                *entry -= 1;
                if *entry == 0 {
                    queue.push_back(name.as_str());
                }
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = nodes
            .iter()
            .map(|(name, _)| name)
            .find(|name| !order.contains(*name))
            .cloned()
            .unwrap_or_default();
        return Err(GraphError::Cycle { step: stuck });
    }
    Ok(order)
}

/// Level of each step: 0 for roots, else 1 + the deepest dependency.
pub fn levels(steps: &[Step], order: &[String]) -> BTreeMap<String, usize> {
    level_pairs(&node_deps_of(steps), order)
}

pub(crate) fn level_pairs(nodes: &[NodeDeps], order: &[String]) -> BTreeMap<String, usize> {
    let deps_of: HashMap<&str, &[String]> = nodes
        .iter()
        .map(|(name, deps)| (name.as_str(), deps.as_slice()))
        .collect();
    let mut level: BTreeMap<String, usize> = nodes.iter().map(|(n, _)| (n.clone(), 0)).collect();
    for node in order {
        let deps = deps_of.get(node.as_str()).copied().unwrap_or_default();
        if let Some(deepest) = deps.iter().filter_map(|d| level.get(d)).max().copied() {
            level.insert(node.clone(), deepest + 1);
        }
    }
    level
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{Step, StepValue};

    fn task(name: &str, deps: &[&str]) -> Step {
        Step::task(name, |_| Ok(StepValue::Empty)).with_deps(deps.iter().copied())
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let steps = vec![task("a", &["missing"])];
        assert_eq!(
            validate_steps(&steps),
            Err(GraphError::UnknownDependency {
                step: "a".into(),
                dep: "missing".into(),
            })
        );
    }

    #[test]
    fn cycle_is_rejected() {
        let steps = vec![task("a", &["b"]), task("b", &["a"])];
        assert!(matches!(
            validate_steps(&steps),
            Err(GraphError::Cycle { .. })
        ));
    }

    #[test]
    fn self_cycle_is_rejected() {
        let steps = vec![task("a", &["a"])];
        assert!(matches!(
            validate_steps(&steps),
            Err(GraphError::Cycle { .. })
        ));
    }

    #[test]
    fn topological_order_respects_deps_and_insertion() {
        let steps = vec![
            task("c", &["a", "b"]),
            task("a", &[]),
            task("b", &["a"]),
            task("d", &[]),
        ];
        let order = topological_order(&steps).unwrap();
        assert_eq!(order, ["a", "d", "b", "c"]);

        let index: std::collections::HashMap<_, _> =
            order.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();
        for step in &steps {
            for dep in step.deps() {
                assert!(index[dep] < index[step.name()], "{dep} before {}", step.name());
            }
        }
    }

    #[test]
    fn levels_count_longest_dependency_chain() {
        let steps = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a", "b"]),
            task("d", &[]),
        ];
        let order = topological_order(&steps).unwrap();
        let level = levels(&steps, &order);
        assert_eq!(level["a"], 0);
        assert_eq!(level["b"], 1);
        assert_eq!(level["c"], 2);
        assert_eq!(level["d"], 0);
    }
}
