//! The pipelined ingest engine: worker threads prepare and download
//! changelists ahead of a single-threaded committer that replays them onto
//! the target repository in changelist order.

pub mod branch_set;
pub mod error;
pub mod latch;
pub mod migrate;
pub mod pool;
pub mod printer;
pub mod shutdown;
pub mod task;

pub use branch_set::BranchSet;
pub use error::EngineError;
pub use migrate::{MigrationConfig, MigrationSummary, Migrator};
pub use pool::ThreadPool;
pub use shutdown::ShutdownFlag;
pub use task::ChangelistTask;
