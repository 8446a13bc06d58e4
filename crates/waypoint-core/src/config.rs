use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default ceiling on super-steps per invocation.
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Per-invocation configuration handed to the executor and to every node.
///
/// There is no process-wide configuration: everything a run needs travels
/// in this value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Tags for filtering and categorization.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Arbitrary metadata key-value pairs.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Maximum number of super-steps a single invoke/resume call may run.
    pub recursion_limit: usize,

    /// Unique identifier for this run.
    pub run_id: Uuid,

    /// Arbitrary configurable values accessible by nodes.
    #[serde(default)]
    pub configurable: HashMap<String, serde_json::Value>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            metadata: HashMap::new(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            run_id: Uuid::new_v4(),
            configurable: HashMap::new(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_configurable(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.configurable.insert(key.into(), value);
        self
    }

    /// Look up a configurable value by key.
    pub fn get_configurable(&self, key: &str) -> Option<&serde_json::Value> {
        self.configurable.get(key)
    }
}
