use clap::Parser;
use std::path::PathBuf;

use crate::config::{BucketLookup, StorageKind};

/// pitr-bootstrap - Point-in-time recovery bootstrap for a MySQL node
///
/// Restores a base backup (optional), stages the change logs found in
/// `--binlog-directory` as relay logs and starts replaying them.
#[derive(Parser, Debug)]
#[command(name = "pitr-bootstrap")]
#[command(about = "Restore a base backup and replay binary logs on a MySQL node")]
#[command(version)]
pub struct Cli {
    /// Remove the data directory and unpack this tar.* archive of MySQL data files.
    ///
    /// The archive must contain paths relative to `/`. Takes priority over
    /// `--storage`.
    #[arg(long, visible_alias = "backup-tar", value_name = "PATH")]
    pub backup_source: Option<PathBuf>,

    /// Directory holding the binary logs to replay
    #[arg(long, value_name = "DIR")]
    pub binlog_directory: Option<PathBuf>,

    /// Restore the base backup from object storage
    #[arg(long, value_name = "KIND")]
    pub storage: Option<StorageKind>,

    /// Object storage region
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Object storage endpoint URL
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Object storage access key
    #[arg(long)]
    pub s3_access_key: Option<String>,

    /// Object storage secret key
    #[arg(long)]
    pub s3_secret_key: Option<String>,

    /// Bucket holding the backup
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Bucket addressing mode (auto, path, virtual-hosted)
    #[arg(long)]
    pub s3_bucket_lookup: Option<BucketLookup>,

    /// Backup path prefix inside the bucket
    #[arg(long, value_name = "PREFIX")]
    pub backup_path: Option<PathBuf>,

    /// JSON configuration file; command line flags take precedence
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// systemd unit controlling the database service
    #[arg(long)]
    pub service_name: Option<String>,

    /// Account owning the data directory
    #[arg(long)]
    pub service_user: Option<String>,

    /// Relay log base name for the staged segments
    #[arg(long)]
    pub relay_log_name: Option<String>,

    /// Number segments by original file name instead of directory order
    #[arg(long)]
    pub sort_segments: bool,

    /// Parallelism for streaming and extracting the backup
    #[arg(long)]
    pub parallel: Option<u32>,

    /// Per-command timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Dry-run mode: log destructive commands instead of executing them.
    ///
    /// Engine introspection still runs so the plan is realistic; no file is
    /// copied and the data directory is left untouched.
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
