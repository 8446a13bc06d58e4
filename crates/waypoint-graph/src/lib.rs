pub mod breakpoint;
pub mod channel;
pub mod compiled;
pub mod constants;
pub mod context;
pub mod edge;
pub mod executor;
pub mod node;
pub mod registry;
pub mod state_graph;
pub mod stream;
pub mod time_travel;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use waypoint_checkpoint::prelude::{
        CheckpointConfigExt, CheckpointStore, GraphOutput, Interrupt, InterruptKind,
        MemoryCheckpointStore, SqliteCheckpointStore,
    };
    pub use waypoint_core::config::RunConfig;
    pub use waypoint_core::error::{GraphError, Result, WaypointError};
    pub use waypoint_core::stream::StreamMode;

    pub use crate::breakpoint::CompileConfig;
    pub use crate::channel::{
        AggregateOp, Append, BinaryOperator, Channel, ChannelSpec, Ephemeral, LastValue, Topic,
    };
    pub use crate::compiled::CompiledStateGraph;
    pub use crate::constants::{END, START};
    pub use crate::context::NodeContext;
    pub use crate::edge::{ConditionalEdge, Edge};
    pub use crate::node::NodeFn;
    pub use crate::registry::ChannelRegistry;
    pub use crate::state_graph::StateGraph;
    pub use crate::stream::{StreamEvent, StreamInput};
    pub use crate::time_travel::StateSnapshot;
}
