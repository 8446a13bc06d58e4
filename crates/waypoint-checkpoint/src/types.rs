use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use waypoint_core::ENGINE_VERSION;
use waypoint_core::config::RunConfig;

use crate::interrupt::{Interrupt, PendingInterrupt};

/// Bumped whenever the persisted checkpoint layout changes incompatibly.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 2;

/// An immutable snapshot of a thread after one super-step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Thread (conversation) identifier. Multiple checkpoints share a thread.
    pub thread_id: String,
    /// Monotonic position within the thread, starting at 0.
    pub sequence: u64,
    /// Channel key → value.
    pub state: Map<String, Value>,
    /// Nodes scheduled to run next. Empty means the thread is finished.
    pub next_nodes: Vec<String>,
    /// Set when the thread is suspended waiting for an external value.
    #[serde(default)]
    pub interrupt: Option<PendingInterrupt>,
    pub metadata: CheckpointMetadata,
    pub engine_version: String,
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
}

fn default_format_version() -> u32 {
    CHECKPOINT_FORMAT_VERSION
}

impl Checkpoint {
    pub fn new(
        thread_id: impl Into<String>,
        sequence: u64,
        state: Map<String, Value>,
        next_nodes: Vec<String>,
        metadata: CheckpointMetadata,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            sequence,
            state,
            next_nodes,
            interrupt: None,
            metadata,
            engine_version: ENGINE_VERSION.to_string(),
            format_version: CHECKPOINT_FORMAT_VERSION,
            created_at: Utc::now(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: PendingInterrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// The state as a JSON object value, the shape nodes receive.
    pub fn state_value(&self) -> Value {
        Value::Object(self.state.clone())
    }

    /// No pending nodes and no pending interrupt.
    pub fn is_terminal(&self) -> bool {
        self.next_nodes.is_empty() && self.interrupt.is_none()
    }

    pub fn interrupt_payload(&self) -> Option<&Value> {
        self.interrupt.as_ref().map(|i| &i.payload)
    }

    /// The caller-facing view of this checkpoint's interrupt, if any.
    pub fn to_interrupt(&self) -> Option<Interrupt> {
        self.interrupt.as_ref().map(|pending| Interrupt {
            thread_id: self.thread_id.clone(),
            sequence: self.sequence,
            node: pending.node.clone(),
            kind: pending.kind,
            payload: pending.payload.clone(),
        })
    }
}

/// How a checkpoint came to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    /// Caller input merged onto defaults (or onto a finished thread).
    Input,
    /// A completed super-step.
    Loop,
    /// A super-step suspended by a node or breakpoint.
    Interrupt,
    /// An out-of-band state edit.
    Update,
    /// First checkpoint of a thread branched from another.
    Fork,
}

/// Metadata describing how a checkpoint was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: CheckpointSource,
    /// Super-steps executed on this thread so far.
    pub step: usize,
    /// Nodes whose updates were merged into this checkpoint, in merge order.
    #[serde(default)]
    pub writes: Vec<String>,
    /// The checkpoint this one was branched from, for forks.
    #[serde(default)]
    pub parent: Option<ParentRef>,
    /// The invoke/resume call that wrote this checkpoint.
    #[serde(default)]
    pub run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Caller metadata from `RunConfig::metadata`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, Value>,
}

impl CheckpointMetadata {
    pub fn new(source: CheckpointSource, step: usize) -> Self {
        Self {
            source,
            step,
            writes: Vec::new(),
            parent: None,
            run_id: None,
            tags: Vec::new(),
            annotations: HashMap::new(),
        }
    }

    pub fn with_writes(mut self, writes: Vec<String>) -> Self {
        self.writes = writes;
        self
    }

    /// Stamp the run id, tags and metadata of the call writing this checkpoint.
    pub fn with_run(mut self, config: &RunConfig) -> Self {
        self.run_id = Some(config.run_id);
        self.tags = config.tags.clone();
        self.annotations = config.metadata.clone();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub thread_id: String,
    pub sequence: u64,
}

/// The outcome of an invoke or resume call.
#[derive(Debug, Clone)]
pub enum GraphOutput {
    /// The thread reached END.
    Complete { state: Value, sequence: u64 },
    /// A node (or breakpoint) suspended the thread.
    Interrupted { interrupt: Interrupt, state: Value },
}

impl GraphOutput {
    pub fn is_complete(&self) -> bool {
        matches!(self, GraphOutput::Complete { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, GraphOutput::Interrupted { .. })
    }

    pub fn state(&self) -> &Value {
        match self {
            GraphOutput::Complete { state, .. } | GraphOutput::Interrupted { state, .. } => state,
        }
    }

    /// Sequence of the checkpoint that backs this result.
    pub fn sequence(&self) -> u64 {
        match self {
            GraphOutput::Complete { sequence, .. } => *sequence,
            GraphOutput::Interrupted { interrupt, .. } => interrupt.sequence,
        }
    }

    pub fn interrupt(&self) -> Option<&Interrupt> {
        match self {
            GraphOutput::Interrupted { interrupt, .. } => Some(interrupt),
            GraphOutput::Complete { .. } => None,
        }
    }

    pub fn into_state(self) -> Value {
        match self {
            GraphOutput::Complete { state, .. } | GraphOutput::Interrupted { state, .. } => state,
        }
    }
}
