//! Read-only view of step payloads handed to step functions.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::step::{Row, StepValue};

/// Results mapping (step name to payload) accumulated during a run.
///
/// The scheduler inserts a payload when a step finishes; a step function
/// only ever observes entries produced by its dependencies, which are
/// guaranteed done before it starts.
#[derive(Debug, Clone, Default)]
pub struct StepResults {
    inner: BTreeMap<String, Arc<StepValue>>,
}

impl StepResults {
    pub fn get(&self, name: &str) -> Option<&StepValue> {
        self.inner.get(name).map(Arc::as_ref)
    }

    /// Rows of a dependency payload: `Rows` as-is, a single `Row` as one
    /// element, empty for anything else or a missing entry.
    pub fn rows(&self, name: &str) -> &[Row] {
        self.get(name).map(StepValue::as_rows).unwrap_or_default()
    }

    /// Boolean result of a branch dependency, if present and boolean.
    pub fn bool_value(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(StepValue::as_bool)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Arc<StepValue>) {
        self.inner.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StepValue)> {
        self.inner
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_ref()))
    }
}
