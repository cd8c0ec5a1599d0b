pub mod checkpoint;
pub mod duckdb;
pub mod traits;

pub use checkpoint::{CheckpointError, CheckpointManager, CheckpointRef};
pub use self::duckdb::DuckDbStore;
pub use traits::{CheckpointRecord, CheckpointStore, RunSummary, StorageError, StoredLog};
