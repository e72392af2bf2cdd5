//! Replication bootstrap
//!
//! Points the engine's SQL thread at the first staged relay log. The replica
//! never connects anywhere: the source host is a placeholder and only the
//! applier thread is started.

use log::info;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ToolPaths;
use crate::error::Result;
use crate::runner::CommandRunner;
use crate::tools::fs::ChownArgs;
use crate::tools::mysql::MysqlExecArgs;

/// First event offset in a relay log (after the 4-byte magic header)
pub const RELAY_LOG_START_POS: u64 = 4;

/// Source host registered for the default channel; never contacted
pub const PLACEHOLDER_SOURCE_HOST: &str = "dummy";

/// A server id unlikely to collide with the node the logs came from.
///
/// Mixes wall-clock time and the process id; never 0 (which disables
/// replication).
pub fn fresh_server_id() -> u32 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seed = now.as_secs()
        ^ (u64::from(now.subsec_nanos()) << 16)
        ^ u64::from(std::process::id());
    ((seed % (u64::from(u32::MAX) - 1)) + 1) as u32
}

/// Quote a value as a single-quoted SQL string literal.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// The administrative directive starting replay from `first_segment`.
pub fn bootstrap_statement(first_segment: &str, server_id: u32) -> String {
    format!(
        "SET GLOBAL server_id={};\
         CHANGE MASTER TO RELAY_LOG_FILE={}, RELAY_LOG_POS={}, MASTER_HOST={} FOR CHANNEL '';\
         START SLAVE SQL_THREAD FOR CHANNEL ''",
        server_id,
        sql_literal(first_segment),
        RELAY_LOG_START_POS,
        sql_literal(PLACEHOLDER_SOURCE_HOST),
    )
}

/// Fixes ownership of the staged files and starts log replay.
pub struct ReplicationBootstrapper<'a> {
    runner: &'a dyn CommandRunner,
    tools: &'a ToolPaths,
    service_user: &'a str,
    data_dir: PathBuf,
}

impl<'a> ReplicationBootstrapper<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        tools: &'a ToolPaths,
        service_user: &'a str,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            tools,
            service_user,
            data_dir: data_dir.into(),
        }
    }

    /// Hand the whole data directory to the service account.
    ///
    /// The copied relay logs belong to whoever ran this tool.
    pub fn fix_ownership(&self) -> Result<()> {
        self.runner.run(&ChownArgs {
            program: self.tools.chown.clone(),
            owner: self.service_user.to_string(),
            path: self.data_dir.clone(),
            tolerate_vanished_files: true,
        })?;
        Ok(())
    }

    /// Issue the replay directive. Requires a running service.
    ///
    /// Returns the server id assigned to this node.
    pub fn bootstrap(&self, first_segment: &str) -> Result<u32> {
        let server_id = fresh_server_id();
        info!(
            "Starting relay log replay from {} as server id {}",
            first_segment, server_id
        );
        self.runner.run(&MysqlExecArgs {
            program: self.tools.mysql.clone(),
            statement: bootstrap_statement(first_segment, server_id),
            purpose: "setup replication".to_string(),
        })?;
        Ok(server_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_statement() {
        let stmt = bootstrap_statement("mysql1-relay-bin.000001", 4242);
        assert_eq!(
            stmt,
            "SET GLOBAL server_id=4242;\
             CHANGE MASTER TO RELAY_LOG_FILE='mysql1-relay-bin.000001', RELAY_LOG_POS=4, \
             MASTER_HOST='dummy' FOR CHANNEL '';\
             START SLAVE SQL_THREAD FOR CHANNEL ''"
        );
    }

    #[test]
    fn test_sql_literal_escapes_quotes() {
        assert_eq!(sql_literal("plain"), "'plain'");
        assert_eq!(sql_literal("it's"), "'it''s'");
        assert_eq!(sql_literal(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn test_fresh_server_id_is_nonzero() {
        for _ in 0..100 {
            assert_ne!(fresh_server_id(), 0);
        }
    }
}
