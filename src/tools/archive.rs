//! Local base backup extraction with `tar`.

use std::path::PathBuf;

use crate::tool_traits::ToolArgs;

/// Type-safe arguments for `tar -C <root> -xaf <archive>`.
///
/// `-a` picks the decompressor from the archive suffix, so `.tar.gz`,
/// `.tar.zst` and `.tar.xz` all work.
#[derive(Debug, Clone)]
pub struct TarExtractArgs {
    pub program: String,
    pub archive: PathBuf,
    /// Directory the archive paths are relative to (normally `/`).
    pub root: PathBuf,
}

impl ToolArgs for TarExtractArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-C".to_string(),
            self.root.display().to_string(),
            "-xaf".to_string(),
            self.archive.display().to_string(),
        ]
    }

    fn purpose(&self) -> &str {
        "restore full backup"
    }
}
