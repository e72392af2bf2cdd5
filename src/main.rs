//! pitr-bootstrap - Main entry point
//!
//! Prepares a MySQL node for point-in-time recovery in one unattended run.

use log::{debug, error, info, warn};
use std::process::ExitCode;

use pitr_bootstrap::process_guard::{self, ShutdownGuard};
use pitr_bootstrap::{Cli, FileConfig, Orchestrator, RecoveryConfig, RecoverySummary, SystemRunner};

/// Initialize the logger with appropriate settings
fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;

    Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env() // Allows RUST_LOG env var to override
        .init();
}

fn main() -> ExitCode {
    init_logger();
    info!("pitr-bootstrap starting up");

    // Children must not outlive us if we receive SIGINT/SIGTERM
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ShutdownGuard;

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed: {:?}", cli);

    match run(&cli) {
        Ok(summary) => {
            info!(
                "Replaying {} relay logs from {} (server id {}, restore: {:?})",
                summary.segments, summary.first_segment, summary.server_id, summary.restore
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<RecoverySummary> {
    use anyhow::Context;

    let file = match &cli.config {
        Some(path) => {
            info!("Loading configuration file: {}", path.display());
            FileConfig::load_from_file(path)?
        }
        None => FileConfig::default(),
    };

    let config = RecoveryConfig::from_sources(cli, file).context("Invalid configuration")?;
    if config.dry_run {
        info!("Dry run: destructive commands will be logged, not executed");
    } else if config.backup_source.is_destructive() {
        warn!(
            "The data directory will be wiped and restored from {}",
            config.backup_source.describe()
        );
    }

    let runner = SystemRunner::new(config.timeout).with_dry_run(config.dry_run);
    let summary = Orchestrator::new(&config, &runner)
        .run()
        .context("Recovery failed")?;
    Ok(summary)
}
