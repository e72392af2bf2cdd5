//! Percona XtraBackup tooling for streamed object storage backups.
//!
//! - `XbcloudGetArgs` for `xbcloud get` (fetch stage)
//! - `XbstreamExtractArgs` for `xbstream -x` (extract stage)
//! - `PrepareArgs` for `xtrabackup --prepare`

use std::path::PathBuf;

use crate::config::ObjectStorageSource;
use crate::tool_traits::ToolArgs;

// ============================================================================
// xbcloud get
// ============================================================================

/// Type-safe arguments for `xbcloud get`.
///
/// Credentials are handed over through the AWS environment variables that
/// `xbcloud` reads when `--s3-access-key`/`--s3-secret-key` are absent, so
/// they never appear in the logged command line.
#[derive(Debug, Clone)]
pub struct XbcloudGetArgs {
    pub program: String,
    pub source: ObjectStorageSource,
    pub parallel: u32,
}

impl ToolArgs for XbcloudGetArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        let s = &self.source;
        let mut args = vec![
            "get".to_string(),
            format!("--storage={}", s.kind),
            format!("--s3-region={}", s.region),
            format!("--s3-bucket={}", s.bucket),
            format!("--s3-bucket-lookup={}", s.bucket_lookup),
            format!("--parallel={}", self.parallel),
        ];
        if let Some(ref endpoint) = s.endpoint {
            args.push(format!("--s3-endpoint={}", endpoint));
        }
        args.push(s.backup_prefix.clone());
        args
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(ref key) = self.source.access_key {
            env.push(("AWS_ACCESS_KEY_ID".to_string(), key.clone()));
        }
        if let Some(ref secret) = self.source.secret_key {
            env.push(("AWS_SECRET_ACCESS_KEY".to_string(), secret.clone()));
        }
        env
    }

    fn purpose(&self) -> &str {
        "fetch backup from object storage"
    }
}

// ============================================================================
// xbstream -x
// ============================================================================

/// Type-safe arguments for `xbstream -x -C <dir>`.
#[derive(Debug, Clone)]
pub struct XbstreamExtractArgs {
    pub program: String,
    pub target_dir: PathBuf,
    pub parallel: u32,
    /// Decompress `.zst`/`.qp` chunks while extracting.
    pub decompress: bool,
}

impl ToolArgs for XbstreamExtractArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "-x".to_string(),
            "-C".to_string(),
            self.target_dir.display().to_string(),
            format!("--parallel={}", self.parallel),
        ];
        if self.decompress {
            args.push("--decompress".to_string());
        }
        args
    }

    fn purpose(&self) -> &str {
        "extract backup stream"
    }
}

// ============================================================================
// xtrabackup --prepare
// ============================================================================

/// Type-safe arguments for `xtrabackup --prepare --target-dir=<dir>`.
#[derive(Debug, Clone)]
pub struct PrepareArgs {
    pub program: String,
    pub target_dir: PathBuf,
}

impl ToolArgs for PrepareArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--prepare".to_string(),
            format!("--target-dir={}", self.target_dir.display()),
        ]
    }

    fn purpose(&self) -> &str {
        "prepare backup"
    }
}
