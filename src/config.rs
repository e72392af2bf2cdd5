//! Recovery configuration
//!
//! The whole run is driven by one immutable [`RecoveryConfig`], built once in
//! `main` from command line flags layered over an optional JSON file and
//! passed explicitly to every component.

use anyhow::{Context, Result as AnyResult};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::{Display, EnumString};

use crate::cli::Cli;
use crate::error::{PitrError, Result};
use crate::harvest::SegmentOrder;
use crate::runner::DEFAULT_TIMEOUT;

pub const DEFAULT_SERVICE_NAME: &str = "mysql";
pub const DEFAULT_SERVICE_USER: &str = "mysql";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_PARALLEL: u32 = 4;

/// Object storage backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[strum(serialize = "s3")]
    S3,
}

/// Bucket addressing mode passed to `xbcloud`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "kebab-case")]
pub enum BucketLookup {
    #[default]
    #[strum(serialize = "auto")]
    Auto,
    #[strum(serialize = "path")]
    Path,
    #[strum(serialize = "virtual-hosted")]
    VirtualHosted,
}

/// Connection parameters for a streamed object storage backup
#[derive(Clone, PartialEq, Eq)]
pub struct ObjectStorageSource {
    pub kind: StorageKind,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: String,
    pub bucket_lookup: BucketLookup,
    pub backup_prefix: String,
}

// Credentials must never reach the log stream
impl fmt::Debug for ObjectStorageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("ObjectStorageSource")
            .field("kind", &self.kind)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key", &redact(&self.access_key))
            .field("secret_key", &redact(&self.secret_key))
            .field("bucket", &self.bucket)
            .field("bucket_lookup", &self.bucket_lookup)
            .field("backup_prefix", &self.backup_prefix)
            .finish()
    }
}

/// Where the base backup comes from. Exactly one variant is active per run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackupSource {
    /// Reuse the database already in the data directory
    #[default]
    None,
    /// tar.* archive with paths relative to `/`
    LocalArchive { path: PathBuf },
    /// Streamed xtrabackup in object storage
    ObjectStorage(ObjectStorageSource),
}

impl BackupSource {
    /// Returns true if restoring this source wipes the data directory
    pub fn is_destructive(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::None => "existing database".to_string(),
            Self::LocalArchive { path } => format!("local archive {}", path.display()),
            Self::ObjectStorage(s) => {
                format!("{} backup {}/{}", s.kind, s.bucket, s.backup_prefix)
            }
        }
    }
}

/// Executables used for every external step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPaths {
    pub systemctl: String,
    pub tar: String,
    pub rm: String,
    pub mkdir: String,
    pub chown: String,
    pub xbcloud: String,
    pub xbstream: String,
    pub xtrabackup: String,
    pub mysqld: String,
    pub mysql: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            systemctl: "systemctl".to_string(),
            tar: "tar".to_string(),
            rm: "rm".to_string(),
            mkdir: "mkdir".to_string(),
            chown: "chown".to_string(),
            xbcloud: "xbcloud".to_string(),
            xbstream: "xbstream".to_string(),
            xtrabackup: "xtrabackup".to_string(),
            mysqld: "mysqld".to_string(),
            mysql: "mysql".to_string(),
        }
    }
}

/// On-disk configuration file. Every field is optional; command line flags win.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub backup_source: Option<PathBuf>,
    pub binlog_directory: Option<PathBuf>,
    pub storage: Option<StorageKind>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_bucket_lookup: Option<BucketLookup>,
    pub backup_path: Option<String>,
    pub service_name: Option<String>,
    pub service_user: Option<String>,
    pub relay_log_name: Option<String>,
    pub sort_segments: Option<bool>,
    pub parallel: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub tools: Option<ToolPaths>,
}

impl FileConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> AnyResult<Self> {
        let content = fs::read_to_string(&path).with_context(|| {
            format!("Failed to read configuration from {:?}", path.as_ref())
        })?;

        let config: FileConfig = serde_json::from_str(&content).with_context(|| {
            format!("Failed to parse configuration from {:?}", path.as_ref())
        })?;

        Ok(config)
    }
}

/// Immutable configuration for one recovery run
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub backup_source: BackupSource,
    /// Checked when the run starts so the failure is logged after discovery
    pub binlog_directory: Option<PathBuf>,
    pub service_name: String,
    pub service_user: String,
    pub relay_log_name: Option<String>,
    pub segment_order: SegmentOrder,
    pub parallel: u32,
    pub timeout: Duration,
    pub dry_run: bool,
    pub tools: ToolPaths,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backup_source: BackupSource::None,
            binlog_directory: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_user: DEFAULT_SERVICE_USER.to_string(),
            relay_log_name: None,
            segment_order: SegmentOrder::Discovery,
            parallel: DEFAULT_PARALLEL,
            timeout: DEFAULT_TIMEOUT,
            dry_run: false,
            tools: ToolPaths::default(),
        }
    }
}

impl RecoveryConfig {
    /// Merge command line flags over the configuration file and validate.
    pub fn from_sources(cli: &Cli, file: FileConfig) -> Result<Self> {
        let local_archive = cli.backup_source.clone().or(file.backup_source);
        let storage = cli.storage.or(file.storage);

        let backup_source = match (local_archive, storage) {
            (Some(path), storage) => {
                if storage.is_some() {
                    warn!(
                        "Both a local archive and object storage are configured, using {}",
                        path.display()
                    );
                }
                BackupSource::LocalArchive { path }
            }
            (None, Some(kind)) => {
                let bucket = cli
                    .s3_bucket
                    .clone()
                    .or(file.s3_bucket)
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| PitrError::config("--s3-bucket is required with --storage"))?;
                let backup_prefix = cli
                    .backup_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned())
                    .or(file.backup_path)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| PitrError::config("--backup-path is required with --storage"))?;

                BackupSource::ObjectStorage(ObjectStorageSource {
                    kind,
                    region: cli
                        .s3_region
                        .clone()
                        .or(file.s3_region)
                        .unwrap_or_else(|| DEFAULT_REGION.to_string()),
                    endpoint: cli.s3_endpoint.clone().or(file.s3_endpoint),
                    access_key: cli.s3_access_key.clone().or(file.s3_access_key),
                    secret_key: cli.s3_secret_key.clone().or(file.s3_secret_key),
                    bucket,
                    bucket_lookup: cli
                        .s3_bucket_lookup
                        .or(file.s3_bucket_lookup)
                        .unwrap_or_default(),
                    backup_prefix,
                })
            }
            (None, None) => BackupSource::None,
        };

        let relay_log_name = cli.relay_log_name.clone().or(file.relay_log_name);
        if let Some(name) = &relay_log_name {
            if name.is_empty() || name.contains('/') {
                return Err(PitrError::config(format!(
                    "Invalid relay log name {:?}: must be a bare file name",
                    name
                )));
            }
        }

        let parallel = cli.parallel.or(file.parallel).unwrap_or(DEFAULT_PARALLEL);
        if parallel == 0 {
            return Err(PitrError::config("--parallel must be at least 1"));
        }

        let timeout = match cli.timeout.or(file.timeout_secs) {
            Some(0) => return Err(PitrError::config("--timeout must be at least 1 second")),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };

        let segment_order = if cli.sort_segments || file.sort_segments.unwrap_or(false) {
            SegmentOrder::Name
        } else {
            SegmentOrder::Discovery
        };

        Ok(Self {
            backup_source,
            binlog_directory: cli
                .binlog_directory
                .clone()
                .or(file.binlog_directory)
                .filter(|p| !p.as_os_str().is_empty()),
            service_name: cli
                .service_name
                .clone()
                .or(file.service_name)
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            service_user: cli
                .service_user
                .clone()
                .or(file.service_user)
                .unwrap_or_else(|| DEFAULT_SERVICE_USER.to_string()),
            relay_log_name,
            segment_order,
            parallel,
            timeout,
            dry_run: cli.dry_run,
            tools: file.tools.unwrap_or_default(),
        })
    }
}
