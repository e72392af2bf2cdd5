//! Type-safe argument contracts for external recovery tools.
//!
//! Every external process the bootstrapper launches is described by a struct
//! implementing [`ToolArgs`]. The runner never sees raw string vectors, so a
//! misspelled flag (`--target_dir` vs `--target-dir`) is fixed in one place.
//!
//! # Design Goals
//!
//! 1. **Single Source of Truth**: The struct definition IS the contract.
//! 2. **Auditable**: `purpose()` labels every log line and error.
//! 3. **Secrets stay off the command line**: credentials travel through
//!    `get_env_vars()`, whose values are never logged.

/// Trait for typed tool arguments.
///
/// # Contract
///
/// - `program()`: executable name or absolute path.
/// - `to_cli_args()`: arguments exactly as the tool expects them.
/// - `get_env_vars()`: extra environment for the child.
/// - `purpose()`: short human label used in logs and errors.
/// - `ignore_pattern()`: regex; a failed run whose combined output matches it
///   is treated as benign.
/// - `is_destructive()`: read-only tools still run under `--dry-run`.
pub trait ToolArgs {
    /// Executable to launch.
    fn program(&self) -> &str;

    /// Convert struct fields to CLI arguments.
    fn to_cli_args(&self) -> Vec<String>;

    /// Environment variables required by the tool.
    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![]
    }

    /// What this invocation is for (e.g. "stop database service").
    fn purpose(&self) -> &str;

    /// Pattern matching benign failure output, if any.
    fn ignore_pattern(&self) -> Option<&str> {
        None
    }

    /// Whether the invocation changes system state.
    fn is_destructive(&self) -> bool {
        true
    }
}
