use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use waypoint_checkpoint::prelude::CheckpointConfigExt;
use waypoint_core::config::RunConfig;
use waypoint_core::error::{CheckpointError, GraphError, Result};
use waypoint_core::stream::StreamMode;

use crate::stream::{StreamEvent, StreamSink};

#[derive(Debug, Default)]
struct InterruptScope {
    /// Answers from earlier resumes, indexed by call order.
    resume_values: Vec<Value>,
    next_call: usize,
    suspended: Option<Value>,
}

/// Handle given to every node invocation.
///
/// Carries the run configuration and gives the node two ways to talk back
/// to the executor: `interrupt` to suspend for an external value, and
/// `emit_token` to stream model output.
#[derive(Clone)]
pub struct NodeContext {
    node: String,
    step: usize,
    config: RunConfig,
    scope: Arc<Mutex<InterruptScope>>,
    sink: StreamSink,
}

impl NodeContext {
    /// A context outside any executor. `interrupt` suspends, tokens go nowhere.
    pub fn new(node: impl Into<String>, config: RunConfig) -> Self {
        Self::for_step(node, 0, config, Vec::new(), StreamSink::default())
    }

    pub(crate) fn for_step(
        node: impl Into<String>,
        step: usize,
        config: RunConfig,
        resume_values: Vec<Value>,
        sink: StreamSink,
    ) -> Self {
        Self {
            node: node.into(),
            step,
            config,
            scope: Arc::new(Mutex::new(InterruptScope {
                resume_values,
                ..InterruptScope::default()
            })),
            sink,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Super-steps already executed on this thread.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn thread_id(&self) -> Option<String> {
        self.config.thread_id()
    }

    /// Wait for an external value.
    ///
    /// The n-th call in a node body returns the n-th resume value once the
    /// thread has been resumed that many times. Until then the call returns
    /// `GraphError::Suspended`; propagate it with `?` so the node unwinds.
    /// Calling again after a suspension is an interrupt-protocol error.
    pub fn interrupt(&self, payload: Value) -> Result<Value> {
        let mut scope = self.lock()?;
        if scope.suspended.is_some() {
            return Err(GraphError::InterruptProtocol(format!(
                "node '{}' called interrupt again after suspending",
                self.node
            ))
            .into());
        }
        let call = scope.next_call;
        scope.next_call += 1;
        if let Some(answer) = scope.resume_values.get(call) {
            return Ok(answer.clone());
        }
        scope.suspended = Some(payload.clone());
        Err(GraphError::Suspended {
            node: self.node.clone(),
            payload,
        }
        .into())
    }

    /// Forward a model output chunk to `raw-model-tokens` subscribers.
    pub async fn emit_token(&self, chunk: impl Into<String>) {
        if !self.sink.wants(StreamMode::Tokens) {
            return;
        }
        self.sink
            .emit(StreamEvent::Token {
                node: self.node.clone(),
                chunk: chunk.into(),
            })
            .await;
    }

    /// The payload of the suspension recorded by this invocation, if any.
    pub(crate) fn take_suspension(&self) -> Result<Option<Value>> {
        Ok(self.lock()?.suspended.take())
    }

    fn lock(&self) -> Result<MutexGuard<'_, InterruptScope>> {
        self.scope
            .lock()
            .map_err(|_| CheckpointError::Storage("interrupt scope lock poisoned".into()).into())
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("node", &self.node)
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;
    use waypoint_core::error::WaypointError;

    #[test]
    fn first_interrupt_suspends() {
        let ctx = NodeContext::new("review", RunConfig::default());
        let err = ctx.interrupt(json!("need-approval")).unwrap_err();
        assert!(matches!(
            err,
            WaypointError::Graph(GraphError::Suspended { ref node, .. }) if node == "review"
        ));
        assert_eq!(ctx.take_suspension().unwrap(), Some(json!("need-approval")));
        assert_eq!(ctx.take_suspension().unwrap(), None);
    }

    #[test]
    fn resume_values_replay_by_call_index() {
        let ctx = NodeContext::for_step(
            "form",
            3,
            RunConfig::default(),
            vec![json!("name"), json!("email")],
            StreamSink::default(),
        );
        assert_eq!(ctx.interrupt(json!("q1")).unwrap(), json!("name"));
        assert_eq!(ctx.interrupt(json!("q2")).unwrap(), json!("email"));
        assert!(ctx.interrupt(json!("q3")).is_err());
        assert_eq!(ctx.take_suspension().unwrap(), Some(json!("q3")));
        assert_eq!(ctx.step(), 3);
    }

    #[test]
    fn second_call_after_suspending_is_protocol_error() {
        let ctx = NodeContext::new("n", RunConfig::default());
        let _ = ctx.interrupt(json!(1));
        let err = ctx.interrupt(json!(2)).unwrap_err();
        assert!(err.is_interrupt_protocol());
    }

    #[test]
    fn thread_id_comes_from_config() {
        let ctx = NodeContext::new("n", RunConfig::default().with_thread_id("t-9"));
        assert_eq!(ctx.thread_id().as_deref(), Some("t-9"));
        assert_eq!(ctx.node(), "n");
    }

    #[tokio::test]
    async fn tokens_only_flow_when_requested() {
        let (tx, mut rx) = mpsc::channel(4);
        let quiet = NodeContext::for_step(
            "llm",
            0,
            RunConfig::default(),
            vec![],
            StreamSink::new(tx.clone(), &[StreamMode::FullState]),
        );
        quiet.emit_token("dropped").await;

        let loud = NodeContext::for_step(
            "llm",
            0,
            RunConfig::default(),
            vec![],
            StreamSink::new(tx, &[StreamMode::Tokens]),
        );
        loud.emit_token("hello").await;
        drop(quiet);
        drop(loud);

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Token {
                node: "llm".into(),
                chunk: "hello".into()
            })
        );
        assert_eq!(rx.recv().await, None);
    }
}
