//! Engine binaries: `mysqld` for configuration discovery, `mysql` for
//! administrative directives.

use crate::tool_traits::ToolArgs;

/// Type-safe arguments for `mysqld --verbose --help`.
///
/// Prints compiled defaults merged with option files; no server is started
/// and no connection is needed.
#[derive(Debug, Clone)]
pub struct MysqldHelpArgs {
    pub program: String,
}

impl ToolArgs for MysqldHelpArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--verbose".to_string(), "--help".to_string()]
    }

    fn purpose(&self) -> &str {
        "read engine configuration"
    }

    fn is_destructive(&self) -> bool {
        false
    }
}

/// Type-safe arguments for `mysql -e <statement>`.
#[derive(Debug, Clone)]
pub struct MysqlExecArgs {
    pub program: String,
    pub statement: String,
    pub purpose: String,
}

impl ToolArgs for MysqlExecArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-e".to_string(), self.statement.clone()]
    }

    fn purpose(&self) -> &str {
        &self.purpose
    }
}
