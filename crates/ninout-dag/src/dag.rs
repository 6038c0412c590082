//! The DAG container: step registration and disable bookkeeping.

use std::collections::BTreeSet;

use crate::error::GraphError;
use crate::layout::{Layout, layout_positions};
use crate::step::Step;
use crate::validate::{node_deps_of, validate_steps};

/// A directed acyclic graph of named steps.
///
/// Steps are registered through [`Dag::add_step`] and keep their insertion
/// order, which makes planning deterministic. Edges or whole steps can be
/// disabled ahead of a run; the executor turns those into `skipped`
/// transitions that propagate downstream.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    steps: Vec<Step>,
    disabled_edges: BTreeSet<(String, String)>,
    disabled_steps: BTreeSet<String>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step. Names are unique within a DAG.
    pub fn add_step(&mut self, step: Step) -> Result<&mut Self, GraphError> {
        if self.get(step.name()).is_some() {
            return Err(GraphError::DuplicateStep {
                step: step.name().to_string(),
            });
        }
        self.steps.push(step);
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.name() == name)
    }

    /// Steps in registration order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run structural validation without executing anything.
    pub fn validate(&self) -> Result<(), GraphError> {
        validate_steps(&self.steps)
    }

    /// Disable a dependency edge; the target (and its dependents) will be
    /// skipped. The edge must exist in the graph.
    pub fn disable_edge(&mut self, source: &str, target: &str) -> Result<(), GraphError> {
        let Some(target_step) = self.get(target) else {
            return Err(GraphError::UnknownDisabledEdge {
                edge_source: source.to_string(),
                target: target.to_string(),
            });
        };
        if self.get(source).is_none() {
            return Err(GraphError::UnknownDisabledEdge {
                edge_source: source.to_string(),
                target: target.to_string(),
            });
        }
        if !target_step.deps().iter().any(|dep| dep == source) {
            return Err(GraphError::EdgeNotInGraph {
                edge_source: source.to_string(),
                target: target.to_string(),
            });
        }
        self.disabled_edges
            .insert((source.to_string(), target.to_string()));
        Ok(())
    }

    pub fn enable_edge(&mut self, source: &str, target: &str) {
        self.disabled_edges
            .remove(&(source.to_string(), target.to_string()));
    }

    pub fn list_disabled_edges(&self) -> Vec<(String, String)> {
        self.disabled_edges.iter().cloned().collect()
    }

    /// Disable a step outright; it and its dependents will be skipped.
    pub fn disable_step(&mut self, name: &str) -> Result<(), GraphError> {
        if self.get(name).is_none() {
            return Err(GraphError::UnknownDisabledStep {
                step: name.to_string(),
            });
        }
        self.disabled_steps.insert(name.to_string());
        Ok(())
    }

    pub fn enable_step(&mut self, name: &str) {
        self.disabled_steps.remove(name);
    }

    pub fn list_disabled_steps(&self) -> Vec<String> {
        self.disabled_steps.iter().cloned().collect()
    }

    pub fn disabled_edges(&self) -> &BTreeSet<(String, String)> {
        &self.disabled_edges
    }

    pub fn disabled_steps(&self) -> &BTreeSet<String> {
        &self.disabled_steps
    }

    /// Canvas positions for rendering this graph.
    pub fn layout(&self) -> Result<Layout, GraphError> {
        layout_positions(&node_deps_of(&self.steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepValue;

    fn task(name: &str, deps: &[&str]) -> Step {
        Step::task(name, |_| Ok(StepValue::Empty)).with_deps(deps.iter().copied())
    }

    fn chain() -> Dag {
        let mut dag = Dag::new();
        dag.add_step(task("a", &[])).unwrap();
        dag.add_step(task("b", &["a"])).unwrap();
        dag.add_step(task("c", &["b"])).unwrap();
        dag
    }

    #[test]
    fn duplicate_step_is_rejected() {
        let mut dag = chain();
        let err = dag.add_step(task("a", &[])).unwrap_err();
        assert_eq!(err, GraphError::DuplicateStep { step: "a".into() });
    }

    #[test]
    fn disable_edge_requires_existing_edge() {
        let mut dag = chain();
        dag.disable_edge("a", "b").unwrap();
        assert_eq!(
            dag.list_disabled_edges(),
            vec![("a".to_string(), "b".to_string())]
        );

        assert!(matches!(
            dag.disable_edge("a", "c"),
            Err(GraphError::EdgeNotInGraph { .. })
        ));
        assert!(matches!(
            dag.disable_edge("a", "missing"),
            Err(GraphError::UnknownDisabledEdge { .. })
        ));

        dag.enable_edge("a", "b");
        assert!(dag.list_disabled_edges().is_empty());
    }

    #[test]
    fn disable_step_requires_existing_step() {
        let mut dag = chain();
        dag.disable_step("b").unwrap();
        assert_eq!(dag.list_disabled_steps(), ["b"]);

        assert!(matches!(
            dag.disable_step("missing"),
            Err(GraphError::UnknownDisabledStep { .. })
        ));

        dag.enable_step("b");
        assert!(dag.list_disabled_steps().is_empty());
    }

    #[test]
    fn validate_reports_unknown_dep() {
        let mut dag = Dag::new();
        dag.add_step(task("a", &["ghost"])).unwrap();
        assert!(matches!(
            dag.validate(),
            Err(GraphError::UnknownDependency { .. })
        ));
    }
}
