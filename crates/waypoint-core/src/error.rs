use serde_json::Value;
use thiserror::Error;

/// Top-level error type for the Waypoint engine.
#[derive(Debug, Error)]
pub enum WaypointError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl WaypointError {
    /// A node (or the routing function attached to it) failed. The thread's
    /// last checkpoint is untouched and the frontier can be retried.
    pub fn is_node_failure(&self) -> bool {
        matches!(
            self,
            WaypointError::Graph(GraphError::NodeExecution { .. } | GraphError::Routing { .. })
        )
    }

    /// The checkpoint being resumed references topology the plan no longer has.
    pub fn is_stale_checkpoint(&self) -> bool {
        matches!(self, WaypointError::Graph(GraphError::StaleCheckpoint { .. }))
    }

    /// The call was rejected by the interrupt protocol without touching state.
    pub fn is_interrupt_protocol(&self) -> bool {
        matches!(self, WaypointError::Graph(GraphError::InterruptProtocol(_)))
    }

    /// Whether calling again against the same thread may succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_node_failure()
            || matches!(
                self,
                WaypointError::Checkpoint(
                    CheckpointError::SequenceConflict { .. } | CheckpointError::Storage(_)
                ) | WaypointError::Graph(GraphError::RecursionLimit { .. })
            )
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Recursion limit ({limit}) exceeded")]
    RecursionLimit { limit: usize },

    #[error("Node error in '{node}' after checkpoint {sequence}: {source}")]
    NodeExecution {
        node: String,
        sequence: u64,
        source: Box<WaypointError>,
    },

    #[error("Node '{node}' routed to '{target}', which is not one of {allowed:?}")]
    Routing {
        node: String,
        target: String,
        allowed: Vec<String>,
    },

    /// Raised by `NodeContext::interrupt` to unwind a node that is waiting
    /// for an external value. The executor intercepts it.
    #[error("Node '{node}' suspended awaiting input")]
    Suspended { node: String, payload: Value },

    #[error("Interrupt protocol violation: {0}")]
    InterruptProtocol(String),

    #[error(
        "Stale checkpoint {sequence} for thread '{thread_id}': node '{node}' is not part of this graph"
    )]
    StaleCheckpoint {
        thread_id: String,
        sequence: u64,
        node: String,
    },

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("No thread_id configured for a checkpointed run")]
    MissingThreadId,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Checkpoint {sequence} already exists for thread '{thread_id}'")]
    SequenceConflict { thread_id: String, sequence: u64 },

    #[error("Checkpoint {sequence} not found for thread '{thread_id}'")]
    NotFound { thread_id: String, sequence: u64 },
}

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

pub type Result<T> = std::result::Result<T, WaypointError>;
