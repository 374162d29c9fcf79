//! PipelineContext - key-value state flowing between steps
//!
//! Owned exclusively by the coordinator for the lifetime of one run and
//! rebuilt at each step boundary from the previous context plus the
//! completed step's folded output. It is never persisted: whatever is
//! needed to rebuild it lives on the run and step-result records.

use serde_json::{Map, Value};

/// Accumulating key-value mapping scoped to a single run
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    values: Map<String, Value>,
}

impl PipelineContext {
    /// Create an empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context seeded with the given keys
    #[must_use]
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Look up a key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Check whether a key is present
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Insert a single key, replacing any existing value
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Merge a map into the context; incoming keys win
    pub fn merge(&mut self, incoming: Map<String, Value>) {
        for (key, value) in incoming {
            self.values.insert(key, value);
        }
    }

    /// Borrow the underlying map
    #[must_use]
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Consume the context, returning the underlying map
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }

    /// Number of keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check whether the context is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
