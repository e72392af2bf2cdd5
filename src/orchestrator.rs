//! Recovery orchestration
//!
//! Runs every step of a recovery in strict order, each one a precondition for
//! the next. The first error aborts the run and is returned to the caller;
//! nothing is retried and there is no resume-from-middle. Re-running from
//! scratch is always safe: a restore rebuilds the data directory and the
//! harvest regenerates the index from the full source listing.

use log::{error, info};
use std::path::PathBuf;

use crate::config::RecoveryConfig;
use crate::error::{PitrError, Result};
use crate::harvest::{DEFAULT_RELAY_LOG_NAME, Harvester};
use crate::introspect::{self, EngineConfig};
use crate::materialize::{MaterializeOutcome, Materializer};
use crate::recovery_state::{RecoveryContext, RecoveryStage};
use crate::replication::ReplicationBootstrapper;
use crate::runner::CommandRunner;

/// What a completed run did
#[derive(Debug, Clone)]
pub struct RecoverySummary {
    pub engine: EngineConfig,
    pub restore: MaterializeOutcome,
    pub segments: usize,
    pub first_segment: String,
    pub server_id: u32,
}

pub struct Orchestrator<'a> {
    config: &'a RecoveryConfig,
    runner: &'a dyn CommandRunner,
    context: RecoveryContext,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a RecoveryConfig, runner: &'a dyn CommandRunner) -> Self {
        Self {
            config,
            runner,
            context: RecoveryContext::new(),
        }
    }

    pub fn context(&self) -> &RecoveryContext {
        &self.context
    }

    /// Run the whole recovery. On error the context records the failed stage.
    pub fn run(&mut self) -> Result<RecoverySummary> {
        match self.run_stages() {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!(
                    "Recovery aborted after stage: {}",
                    self.context.current_stage()
                );
                let _ = self.context.fail();
                Err(e)
            }
        }
    }

    fn run_stages(&mut self) -> Result<RecoverySummary> {
        let config = self.config;
        let runner = self.runner;

        let engine = introspect::discover_config(runner, &config.tools)?;
        let binlog_dir: PathBuf = config
            .binlog_directory
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                PitrError::config(
                    "PiTR binary logs directory is not defined, use --binlog-directory <location>",
                )
            })?;
        self.advance(RecoveryStage::ConfigDiscovered)?;

        let data_dir = engine.data_directory.clone();
        let restore = Materializer::new(runner, config).materialize(&data_dir)?;
        if restore != MaterializeOutcome::ReusedExisting {
            self.advance(RecoveryStage::BackupMaterialized)?;
        }

        let prefix = config
            .relay_log_name
            .clone()
            .or_else(|| engine.relay_log_basename.clone())
            .unwrap_or_else(|| DEFAULT_RELAY_LOG_NAME.to_string());
        let report = Harvester::new(&binlog_dir, &data_dir, engine.relay_index_path())
            .with_prefix(prefix)
            .with_order(config.segment_order)
            .with_dry_run(runner.is_dry_run())
            .harvest()?;
        self.advance(RecoveryStage::LogsHarvested)?;

        let bootstrapper =
            ReplicationBootstrapper::new(runner, &config.tools, &config.service_user, &data_dir);
        bootstrapper.fix_ownership()?;
        self.advance(RecoveryStage::OwnershipFixed)?;

        let server_id = bootstrapper.bootstrap(&report.first_segment)?;
        self.advance(RecoveryStage::ReplicationBootstrapped)?;
        self.advance(RecoveryStage::Done)?;

        Ok(RecoverySummary {
            engine,
            restore,
            segments: report.segments.len(),
            first_segment: report.first_segment,
            server_id,
        })
    }

    fn advance(&mut self, stage: RecoveryStage) -> Result<()> {
        self.context.transition_to(stage)?;
        info!("Recovery stage: {}", stage);
        Ok(())
    }
}
