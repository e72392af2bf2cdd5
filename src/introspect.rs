//! Engine configuration discovery
//!
//! Reads the data directory and relay-log settings from the variables table
//! printed by `mysqld --verbose --help`. This works without a running server
//! or credentials, and reflects the option files the service will use.

use log::{debug, info};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::config::ToolPaths;
use crate::error::{PitrError, Result};
use crate::runner::CommandRunner;
use crate::tools::mysql::MysqldHelpArgs;

/// Value printed for unset options in the variables table
const NO_DEFAULT_VALUE: &str = "(No default value)";

static RELAY_LOG_INDEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^relay-log-index[ \t]+(\S.*?)[ \t]*\r?$").expect("invalid relay-log-index pattern")
});

static RELAY_LOG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^relay-log[ \t]+(\S.*?)[ \t]*\r?$").expect("invalid relay-log pattern")
});

static DATADIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^datadir[ \t]+(\S.*?)[ \t]*\r?$").expect("invalid datadir pattern")
});

/// Engine settings the recovery run depends on. Read-only for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub data_directory: PathBuf,
    /// `relay-log-index` as configured: a bare file name or an absolute path
    pub relay_index_file_name: String,
    /// Base name from `relay-log`, when configured
    pub relay_log_basename: Option<String>,
}

impl EngineConfig {
    /// Location of the relay log index file.
    ///
    /// A relative name lives in the data directory; an absolute one is kept.
    pub fn relay_index_path(&self) -> PathBuf {
        self.data_directory.join(&self.relay_index_file_name)
    }
}

fn first_value(re: &Regex, output: &str) -> Option<String> {
    re.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|v| v != NO_DEFAULT_VALUE)
}

/// Extract the engine configuration from `mysqld --verbose --help` output.
pub fn parse_engine_config(help_output: &str) -> Result<EngineConfig> {
    let relay_index_file_name = first_value(&RELAY_LOG_INDEX_RE, help_output).ok_or_else(|| {
        PitrError::introspection("Can't find relay log files index location (relay-log-index)")
    })?;

    let data_directory = first_value(&DATADIR_RE, help_output)
        .map(PathBuf::from)
        .ok_or_else(|| PitrError::introspection("Can't find data directory location (datadir)"))?;

    let relay_log_basename = first_value(&RELAY_LOG_RE, help_output).and_then(|v| {
        Path::new(&v)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    });

    Ok(EngineConfig {
        data_directory,
        relay_index_file_name,
        relay_log_basename,
    })
}

/// Ask the engine binary for its effective configuration.
pub fn discover_config(runner: &dyn CommandRunner, tools: &ToolPaths) -> Result<EngineConfig> {
    let result = runner.run(&MysqldHelpArgs {
        program: tools.mysqld.clone(),
    })?;
    debug!("{} produced {} bytes of help output", tools.mysqld, result.output.len());

    let config = parse_engine_config(&result.output)?;
    info!("Data directory {}", config.data_directory.display());
    info!("Relay log index file {}", config.relay_index_file_name);
    if let Some(ref basename) = config.relay_log_basename {
        info!("Relay log base name {}", basename);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELP_OUTPUT: &str = "\
mysqld  Ver 8.0.36 for Linux on x86_64 (MySQL Community Server - GPL)
Usage: mysqld [OPTIONS]

  --datadir=name      Path to the database root directory
  --relay-log-index=name
                      File that holds the names for relay log files.

Variables (--variable-name=value)
and boolean options {FALSE|TRUE}                             Value (after reading options)
------------------------------------------------------------ -------------
datadir                                                      /var/lib/mysql/
relay-log                                                    mysql1-relay-bin
relay-log-index                                              mysql1-relay-bin.index
relay-log-info-file                                          relay-log.info
";

    #[test]
    fn test_parse_engine_config() {
        let config = parse_engine_config(HELP_OUTPUT).unwrap();
        assert_eq!(config.data_directory, PathBuf::from("/var/lib/mysql/"));
        assert_eq!(config.relay_index_file_name, "mysql1-relay-bin.index");
        assert_eq!(config.relay_log_basename.as_deref(), Some("mysql1-relay-bin"));
        assert_eq!(
            config.relay_index_path(),
            PathBuf::from("/var/lib/mysql/mysql1-relay-bin.index")
        );
    }

    #[test]
    fn test_option_descriptions_are_not_values() {
        // "--datadir=name" lines must not be mistaken for the variables table
        let output = "  --datadir=name      Path to the database root directory\n";
        assert!(parse_engine_config(output).is_err());
    }

    #[test]
    fn test_first_occurrence_wins() {
        let output = "datadir /data/first\ndatadir /data/second\nrelay-log-index r.index\n";
        let config = parse_engine_config(output).unwrap();
        assert_eq!(config.data_directory, PathBuf::from("/data/first"));
    }

    #[test]
    fn test_missing_relay_index_is_fatal() {
        let output = "datadir                /var/lib/mysql/\n\
                      relay-log-index        (No default value)\n";
        let err = parse_engine_config(output).unwrap_err();
        assert!(matches!(err, PitrError::Introspection(_)));
        assert!(err.to_string().contains("relay log files index"));
    }

    #[test]
    fn test_missing_datadir_is_fatal() {
        let err = parse_engine_config("relay-log-index r.index\n").unwrap_err();
        assert!(err.to_string().contains("data directory"));
    }

    #[test]
    fn test_relay_log_basename_from_path() {
        let output = "datadir /d/\nrelay-log /var/log/mysql/node-relay\nrelay-log-index /var/log/mysql/node-relay.index\n";
        let config = parse_engine_config(output).unwrap();
        assert_eq!(config.relay_log_basename.as_deref(), Some("node-relay"));
        assert_eq!(
            config.relay_index_path(),
            PathBuf::from("/var/log/mysql/node-relay.index")
        );
    }

    #[test]
    fn test_unset_relay_log_basename() {
        let output = "datadir /d/\nrelay-log (No default value)\nrelay-log-index r.index\n";
        let config = parse_engine_config(output).unwrap();
        assert!(config.relay_log_basename.is_none());
    }
}
