//! PITR Bootstrap Library
//!
//! Restores a MySQL data directory from a base backup, stages archived binary
//! logs as relay logs and starts the SQL thread replaying them.

pub mod cli;
pub mod config;
pub mod error;
pub mod harvest;
pub mod introspect;
pub mod materialize;
pub mod orchestrator;
pub mod process_guard;
pub mod recovery_state;
pub mod replication;
pub mod runner;
pub mod tool_traits;
pub mod tools;

// Re-export main types for convenience
pub use cli::Cli;
pub use config::{
    BackupSource, BucketLookup, FileConfig, ObjectStorageSource, RecoveryConfig, StorageKind,
    ToolPaths,
};
pub use error::{PitrError, Result};
pub use harvest::{HarvestReport, Harvester, LogIndex, LogSegmentFile, SegmentOrder};
pub use introspect::{EngineConfig, discover_config, parse_engine_config};
pub use materialize::{MaterializeOutcome, Materializer};
pub use orchestrator::{Orchestrator, RecoverySummary};
pub use process_guard::{ShutdownGuard, ToolProcessGroup};
pub use recovery_state::{RecoveryContext, RecoveryStage, RecoveryTransitionError};
pub use replication::ReplicationBootstrapper;
pub use runner::{CommandResult, CommandRunner, SystemRunner};
pub use tool_traits::ToolArgs;
