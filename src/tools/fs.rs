//! Filesystem tools: data directory removal, creation and ownership.

use std::path::PathBuf;

use crate::tool_traits::ToolArgs;

// ============================================================================
// Remove Directory
// ============================================================================

/// Type-safe arguments for `rm -rf <path>`.
#[derive(Debug, Clone)]
pub struct RemoveDirArgs {
    pub program: String,
    pub path: PathBuf,
}

impl ToolArgs for RemoveDirArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-rf".to_string(), self.path.display().to_string()]
    }

    fn purpose(&self) -> &str {
        "cleanup data directory"
    }
}

// ============================================================================
// Make Directory
// ============================================================================

/// Type-safe arguments for `mkdir -p <path>`.
#[derive(Debug, Clone)]
pub struct MakeDirArgs {
    pub program: String,
    pub path: PathBuf,
}

impl ToolArgs for MakeDirArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-p".to_string(), self.path.display().to_string()]
    }

    fn purpose(&self) -> &str {
        "create data directory"
    }
}

// ============================================================================
// Change Ownership
// ============================================================================

/// The engine drops and creates `#sql...`/`#innodb...` temp files while the
/// service runs; losing one mid-walk is harmless.
pub const VANISHED_TEMP_FILE_PATTERN: &str =
    r"chown: cannot (access|dereference) '[^']*#[^']*': No such file or directory";

/// Type-safe arguments for `chown -R <owner> <path>`.
#[derive(Debug, Clone)]
pub struct ChownArgs {
    pub program: String,
    /// `user` or `user:group`.
    pub owner: String,
    pub path: PathBuf,
    /// Set when the service may be running during the walk.
    pub tolerate_vanished_files: bool,
}

impl ToolArgs for ChownArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-R".to_string(),
            self.owner.clone(),
            self.path.display().to_string(),
        ]
    }

    fn purpose(&self) -> &str {
        "change data directory ownership"
    }

    fn ignore_pattern(&self) -> Option<&str> {
        self.tolerate_vanished_files
            .then_some(VANISHED_TEMP_FILE_PATTERN)
    }
}
