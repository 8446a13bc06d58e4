pub mod collaborator;
pub mod config;
pub mod error;
pub mod stream;

/// Version string recorded on every persisted checkpoint.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::ENGINE_VERSION;
    pub use crate::collaborator::{Collaborator, FnCollaborator, ScriptedCollaborator};
    pub use crate::config::RunConfig;
    pub use crate::error::{
        CheckpointError, CollaboratorError, GraphError, Result, WaypointError,
    };
    pub use crate::stream::{StreamMode, parse_stream_modes};
}
