use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use waypoint_core::error::{GraphError, Result};

use crate::context::NodeContext;

type AsyncNodeFn =
    dyn Fn(Value, NodeContext) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        + Send
        + Sync;

/// A graph node: an async function from a read-only state copy to a
/// partial update. `null` or `{}` means "no update".
#[derive(Clone)]
pub struct NodeFn {
    name: String,
    func: Arc<AsyncNodeFn>,
    writes: Option<Vec<String>>,
}

impl NodeFn {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |state, ctx| Box::pin(func(state, ctx))),
            writes: None,
        }
    }

    /// Declare the channels this node may write. Checked against the
    /// registry at compile time and against every update at run time.
    pub fn with_writes<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn writes(&self) -> Option<&[String]> {
        self.writes.as_deref()
    }

    pub async fn invoke(&self, state: Value, ctx: NodeContext) -> Result<Value> {
        let update = (self.func)(state, ctx).await?;
        self.check_writes(&update)?;
        Ok(update)
    }

    fn check_writes(&self, update: &Value) -> Result<()> {
        let (Some(declared), Value::Object(fields)) = (&self.writes, update) else {
            return Ok(());
        };
        match fields.keys().find(|k| !declared.contains(*k)) {
            Some(key) => Err(GraphError::Channel(format!(
                "node '{}' wrote undeclared channel '{key}'",
                self.name
            ))
            .into()),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for NodeFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeFn")
            .field("name", &self.name)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waypoint_core::config::RunConfig;
    use waypoint_core::error::WaypointError;

    fn ctx() -> NodeContext {
        NodeContext::new("test", RunConfig::default())
    }

    #[tokio::test]
    async fn returns_partial_update() {
        let node = NodeFn::new("double", |state: Value, _ctx| async move {
            let n = state["n"].as_i64().unwrap_or(0);
            Ok(json!({"n": n * 2}))
        });
        let update = node.invoke(json!({"n": 5, "other": true}), ctx()).await.unwrap();
        assert_eq!(update, json!({"n": 10}));
        assert_eq!(node.name(), "double");
    }

    #[tokio::test]
    async fn errors_propagate() {
        let node = NodeFn::new("fail", |_state: Value, _ctx| async move {
            Err(WaypointError::Other("boom".into()))
        });
        let err = node.invoke(json!({}), ctx()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn declared_writes_are_enforced() {
        let node = NodeFn::new("writer", |_state: Value, _ctx| async move {
            Ok(json!({"allowed": 1, "sneaky": 2}))
        })
        .with_writes(["allowed"]);
        assert_eq!(node.writes(), Some(&["allowed".to_string()][..]));

        let err = node.invoke(json!({}), ctx()).await.unwrap_err();
        assert!(err.to_string().contains("sneaky"));
    }

    #[tokio::test]
    async fn null_update_passes_write_check() {
        let node = NodeFn::new("noop", |_state: Value, _ctx| async move { Ok(Value::Null) })
            .with_writes(Vec::<String>::new());
        assert_eq!(node.invoke(json!({}), ctx()).await.unwrap(), Value::Null);
    }
}
