//! Execution planning: ordering plus validated disable sets.

use std::collections::BTreeSet;

use crate::error::GraphError;
use crate::step::Step;
use crate::validate::{topological_order, validate_steps};

/// Immutable plan consumed by the executor.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub order: Vec<String>,
    pub disabled_edges: BTreeSet<(String, String)>,
    pub disabled_steps: BTreeSet<String>,
}

impl ExecutionPlan {
    /// Sources of disabled edges targeting `step`, sorted.
    pub fn disabled_deps_of(&self, step: &str) -> Vec<String> {
        self.disabled_edges
            .iter()
            .filter(|(_, target)| target == step)
            .map(|(source, _)| source.clone())
            .collect()
    }

    pub fn is_step_disabled(&self, step: &str) -> bool {
        self.disabled_steps.contains(step)
    }

    pub fn is_edge_disabled(&self, source: &str, target: &str) -> bool {
        self.disabled_edges
            .contains(&(source.to_string(), target.to_string()))
    }
}

/// Validate the graph and the disable sets, then fix the execution order.
pub fn compile_execution_plan(
    steps: &[Step],
    disabled_edges: &BTreeSet<(String, String)>,
    disabled_steps: &BTreeSet<String>,
) -> Result<ExecutionPlan, GraphError> {
    validate_steps(steps)?;

    for name in disabled_steps {
        if !steps.iter().any(|step| step.name() == name) {
            return Err(GraphError::UnknownDisabledStep { step: name.clone() });
        }
    }

    for (source, target) in disabled_edges {
        let Some(target_step) = steps.iter().find(|step| step.name() == target.as_str()) else {
            return Err(GraphError::UnknownDisabledEdge {
                edge_source: source.clone(),
                target: target.clone(),
            });
        };
        if !steps.iter().any(|step| step.name() == source.as_str()) {
            return Err(GraphError::UnknownDisabledEdge {
                edge_source: source.clone(),
                target: target.clone(),
            });
        }
        if !target_step.deps().iter().any(|dep| dep == source) {
            return Err(GraphError::EdgeNotInGraph {
                edge_source: source.clone(),
                target: target.clone(),
            });
        }
    }

    let order = topological_order(steps)?;
    tracing::debug!(steps = order.len(), "compiled execution plan");
    Ok(ExecutionPlan {
        order,
        disabled_edges: disabled_edges.clone(),
        disabled_steps: disabled_steps.clone(),
    })
}
