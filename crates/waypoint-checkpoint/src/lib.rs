pub mod config_ext;
pub mod interrupt;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;
pub mod store;
pub mod types;

pub mod prelude {
    pub use crate::config_ext::CheckpointConfigExt;
    pub use crate::interrupt::{
        Interrupt, InterruptKind, PendingInterrupt, PendingWrite, config_keys,
    };
    pub use crate::memory::MemoryCheckpointStore;
    pub use crate::sqlite::SqliteCheckpointStore;
    pub use crate::store::CheckpointStore;
    pub use crate::types::{
        CHECKPOINT_FORMAT_VERSION, Checkpoint, CheckpointMetadata, CheckpointSource,
        GraphOutput, ParentRef,
    };
}
