use serde_json::json;

use waypoint_core::config::RunConfig;
use waypoint_core::error::{GraphError, Result};

use crate::interrupt::config_keys;

/// Extension trait for `RunConfig` to address a checkpointed thread.
pub trait CheckpointConfigExt {
    fn with_thread_id(self, thread_id: impl Into<String>) -> Self;
    fn thread_id(&self) -> Option<String>;
    /// The configured thread id, or `GraphError::MissingThreadId`.
    fn require_thread_id(&self) -> Result<String>;
}

impl CheckpointConfigExt for RunConfig {
    fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.configurable
            .insert(config_keys::THREAD_ID.into(), json!(thread_id.into()));
        self
    }

    fn thread_id(&self) -> Option<String> {
        self.configurable
            .get(config_keys::THREAD_ID)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    fn require_thread_id(&self) -> Result<String> {
        self.thread_id()
            .ok_or_else(|| GraphError::MissingThreadId.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_thread_id() {
        let config = RunConfig::default().with_thread_id("thread-1");
        assert_eq!(config.thread_id(), Some("thread-1".to_string()));
        assert_eq!(config.require_thread_id().unwrap(), "thread-1");
    }

    #[test]
    fn missing_thread_id() {
        let config = RunConfig::default();
        assert_eq!(config.thread_id(), None);
        assert!(config.require_thread_id().is_err());
    }

    #[test]
    fn chaining_preserves_other_config() {
        let config = RunConfig::default()
            .with_tag("test")
            .with_recursion_limit(7)
            .with_thread_id("t-1");

        assert_eq!(config.tags, vec!["test"]);
        assert_eq!(config.recursion_limit, 7);
        assert_eq!(config.thread_id(), Some("t-1".to_string()));
    }

    #[test]
    fn overwrite_thread_id() {
        let config = RunConfig::default()
            .with_thread_id("old")
            .with_thread_id("new");
        assert_eq!(config.thread_id(), Some("new".to_string()));
    }
}
