//! Error handling for the recovery bootstrapper
//!
//! Every failure in the run surfaces as a `PitrError` and travels up to the
//! single handler in `main`. There is no partial-success state: the run is
//! either fully recovered and replaying, or aborted with a logged cause.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the recovery bootstrapper
#[derive(Error, Debug)]
pub enum PitrError {
    /// IO errors without a more specific location
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO errors tied to a concrete file or directory
    #[error("IO error on {}: {source}", .path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors (missing flags, invalid values, missing archive)
    #[error("Configuration error: {0}")]
    Config(String),

    /// External command could not be started at all
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// External command exited unsuccessfully and the failure was not ignorable
    #[error("{purpose} failed ({}): {command}", exit_label(.exit_code))]
    CommandFailed {
        purpose: String,
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// External command exceeded the wall-clock bound and was killed
    #[error("{purpose} timed out after {seconds}s: {command}")]
    Timeout {
        purpose: String,
        command: String,
        seconds: u64,
    },

    /// Engine configuration could not be discovered
    #[error("Engine introspection error: {0}")]
    Introspection(String),

    /// Change-log harvesting errors
    #[error("Harvest error: {0}")]
    Harvest(String),

    /// Recovery state machine transition errors
    #[error("Recovery transition error: {0}")]
    Transition(String),

    /// Invalid ignore pattern on a tool invocation
    #[error("Invalid ignore pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Result type alias for recovery operations
pub type Result<T> = std::result::Result<T, PitrError>;

impl PitrError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an introspection error
    pub fn introspection(msg: impl Into<String>) -> Self {
        Self::Introspection(msg.into())
    }

    /// Create a harvest error
    pub fn harvest(msg: impl Into<String>) -> Self {
        Self::Harvest(msg.into())
    }

    /// Create a transition error
    pub fn transition(msg: impl Into<String>) -> Self {
        Self::Transition(msg.into())
    }

    /// Attach a path to an IO error
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }
}
