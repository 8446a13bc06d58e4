use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use waypoint_checkpoint::prelude::{GraphOutput, Interrupt};
use waypoint_core::error::Result;
use waypoint_core::stream::StreamMode;

/// Events emitted while a graph runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Full state after a super-step, once its checkpoint is durable.
    Values {
        step: usize,
        sequence: u64,
        state: Value,
    },
    /// One node's partial update, in merge order.
    Updates {
        step: usize,
        node: String,
        update: Value,
    },
    /// A chunk a node forwarded from a model call.
    Token { node: String, chunk: String },
    NodeStart { node: String, step: usize },
    NodeEnd { node: String, step: usize },
    /// The thread reached END.
    Complete { state: Value, sequence: u64 },
    /// The thread is suspended.
    Interrupted { interrupt: Interrupt },
    Error { message: String },
}

impl StreamEvent {
    /// The mode that enables this event. Terminal events have none and are
    /// always delivered.
    pub fn mode(&self) -> Option<StreamMode> {
        match self {
            StreamEvent::Values { .. } => Some(StreamMode::FullState),
            StreamEvent::Updates { .. } => Some(StreamMode::Delta),
            StreamEvent::Token { .. } => Some(StreamMode::Tokens),
            StreamEvent::NodeStart { .. } | StreamEvent::NodeEnd { .. } => Some(StreamMode::Debug),
            StreamEvent::Complete { .. }
            | StreamEvent::Interrupted { .. }
            | StreamEvent::Error { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.mode().is_none()
    }
}

/// What a streamed run should do with its value.
#[derive(Debug, Clone)]
pub enum StreamInput {
    /// Start or continue a thread, like `invoke`.
    Input(Value),
    /// Answer a pending interrupt, like `resume`.
    Resume(Value),
}

/// Filters events by mode and forwards them to an optional channel.
///
/// A dropped receiver is not an error: the run keeps going and its
/// checkpoints are still written.
#[derive(Clone, Default)]
pub(crate) struct StreamSink {
    tx: Option<mpsc::Sender<StreamEvent>>,
    modes: Arc<[StreamMode]>,
}

impl StreamSink {
    pub(crate) fn new(tx: mpsc::Sender<StreamEvent>, modes: &[StreamMode]) -> Self {
        Self {
            tx: Some(tx),
            modes: modes.into(),
        }
    }

    pub(crate) fn wants(&self, mode: StreamMode) -> bool {
        self.tx.is_some() && self.modes.contains(&mode)
    }

    pub(crate) async fn emit(&self, event: StreamEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        let enabled = match event.mode() {
            Some(mode) => self.modes.contains(&mode),
            None => true,
        };
        if enabled && tx.send(event).await.is_err() {
            tracing::trace!("stream receiver dropped");
        }
    }

    /// Emit the terminal event for a finished call.
    pub(crate) async fn finish(&self, result: &Result<GraphOutput>) {
        let event = match result {
            Ok(GraphOutput::Complete { state, sequence }) => StreamEvent::Complete {
                state: state.clone(),
                sequence: *sequence,
            },
            Ok(GraphOutput::Interrupted { interrupt, .. }) => StreamEvent::Interrupted {
                interrupt: interrupt.clone(),
            },
            Err(e) => StreamEvent::Error {
                message: e.to_string(),
            },
        };
        self.emit(event).await;
    }
}
