use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What caused a thread to suspend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    /// A node called `interrupt` from inside its body.
    Node,
    /// A static breakpoint fired before the super-step ran.
    Before,
    /// A static breakpoint fired after the super-step was merged.
    After,
}

/// The suspension record persisted on a checkpoint.
///
/// For `InterruptKind::Node` the named node is re-entered on resume: every
/// value in `resume_values` is handed back, in call order, to the node's
/// successive `interrupt` calls, and it reads the checkpoint's state, which
/// is still the input of the suspended super-step. `writes` holds the
/// updates of frontier nodes that already finished. They are merged
/// together with the resumed node's update once it completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInterrupt {
    pub kind: InterruptKind,
    pub node: String,
    pub payload: Value,
    #[serde(default)]
    pub resume_values: Vec<Value>,
    #[serde(default)]
    pub writes: Vec<PendingWrite>,
}

/// A partial update held back until its super-step completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub node: String,
    pub update: Value,
}

impl PendingWrite {
    pub fn new(node: impl Into<String>, update: Value) -> Self {
        Self {
            node: node.into(),
            update,
        }
    }
}

impl PendingInterrupt {
    pub fn node(node: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: InterruptKind::Node,
            node: node.into(),
            payload,
            resume_values: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn breakpoint(kind: InterruptKind, node: impl Into<String>) -> Self {
        let node = node.into();
        let position = match kind {
            InterruptKind::After => "after",
            _ => "before",
        };
        Self {
            kind,
            payload: serde_json::json!({ "breakpoint": position, "node": node }),
            node,
            resume_values: Vec::new(),
            writes: Vec::new(),
        }
    }
}

/// An interrupt as reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub thread_id: String,
    /// Sequence of the checkpoint that holds the suspension.
    pub sequence: u64,
    pub node: String,
    pub kind: InterruptKind,
    pub payload: Value,
}

/// Keys used in `RunConfig::configurable` for checkpoint addressing.
pub mod config_keys {
    pub const THREAD_ID: &str = "thread_id";
}
