//! Base backup restore
//!
//! Both restoring variants are destructive: the data directory is discarded
//! unconditionally before the backup is unpacked. They run only when a backup
//! source is explicitly configured. Any failing step aborts the run; there is
//! no partial-restore recovery, the operator re-runs after fixing the cause.

use log::info;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::config::{BackupSource, ObjectStorageSource, RecoveryConfig};
use crate::error::{PitrError, Result};
use crate::runner::CommandRunner;
use crate::tools::archive::TarExtractArgs;
use crate::tools::fs::{ChownArgs, MakeDirArgs, RemoveDirArgs};
use crate::tools::service::{ServiceAction, ServiceArgs};
use crate::tools::xtrabackup::{PrepareArgs, XbcloudGetArgs, XbstreamExtractArgs};

/// What the materializer did with the data directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeOutcome {
    /// No source configured; existing database kept
    ReusedExisting,
    RestoredLocalArchive,
    RestoredObjectStorage,
}

/// Refuse to wipe anything that is not an absolute, non-root directory.
pub fn guard_data_directory(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(PitrError::config(format!(
            "Refusing to wipe relative data directory {}",
            path.display()
        )));
    }
    if !path.components().any(|c| matches!(c, Component::Normal(_))) {
        return Err(PitrError::config(format!(
            "Refusing to wipe data directory {}",
            path.display()
        )));
    }
    Ok(())
}

/// Populates the data directory from the configured backup source.
pub struct Materializer<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a RecoveryConfig,
}

impl<'a> Materializer<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a RecoveryConfig) -> Self {
        Self { runner, config }
    }

    pub fn materialize(&self, data_dir: &Path) -> Result<MaterializeOutcome> {
        match &self.config.backup_source {
            BackupSource::None => {
                info!("Using existing database");
                Ok(MaterializeOutcome::ReusedExisting)
            }
            BackupSource::LocalArchive { path } => {
                self.restore_local_archive(path, data_dir)?;
                Ok(MaterializeOutcome::RestoredLocalArchive)
            }
            BackupSource::ObjectStorage(source) => {
                self.restore_object_storage(source, data_dir)?;
                Ok(MaterializeOutcome::RestoredObjectStorage)
            }
        }
    }

    /// stop → wipe → `tar -C /` → start. Archives are consistent already.
    fn restore_local_archive(&self, archive: &Path, data_dir: &Path) -> Result<()> {
        match fs::metadata(archive) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(PitrError::config(format!(
                    "Backup archive {} is not a file",
                    archive.display()
                )));
            }
            Err(e) => {
                return Err(PitrError::config(format!(
                    "Can't find backup archive {}: {}",
                    archive.display(),
                    e
                )));
            }
        }
        guard_data_directory(data_dir)?;

        info!("Restoring {} into {}", archive.display(), data_dir.display());
        self.service(ServiceAction::Stop)?;
        self.remove_data_dir(data_dir)?;
        self.runner.run(&TarExtractArgs {
            program: self.config.tools.tar.clone(),
            archive: archive.to_path_buf(),
            root: PathBuf::from("/"),
        })?;
        self.service(ServiceAction::Start)?;
        Ok(())
    }

    /// stop → wipe → recreate → fetch | extract → prepare → chown → start.
    fn restore_object_storage(&self, source: &ObjectStorageSource, data_dir: &Path) -> Result<()> {
        guard_data_directory(data_dir)?;
        let tools = &self.config.tools;

        info!(
            "Restoring {} into {}",
            self.config.backup_source.describe(),
            data_dir.display()
        );
        self.service(ServiceAction::Stop)?;
        self.remove_data_dir(data_dir)?;
        self.runner.run(&MakeDirArgs {
            program: tools.mkdir.clone(),
            path: data_dir.to_path_buf(),
        })?;

        self.runner.run_pipeline(
            "stream backup from object storage",
            &XbcloudGetArgs {
                program: tools.xbcloud.clone(),
                source: source.clone(),
                parallel: self.config.parallel,
            },
            &XbstreamExtractArgs {
                program: tools.xbstream.clone(),
                target_dir: data_dir.to_path_buf(),
                parallel: self.config.parallel,
                decompress: true,
            },
        )?;

        self.runner.run(&PrepareArgs {
            program: tools.xtrabackup.clone(),
            target_dir: data_dir.to_path_buf(),
        })?;
        self.runner.run(&ChownArgs {
            program: tools.chown.clone(),
            owner: self.config.service_user.clone(),
            path: data_dir.to_path_buf(),
            tolerate_vanished_files: false,
        })?;
        self.service(ServiceAction::Start)?;
        Ok(())
    }

    fn service(&self, action: ServiceAction) -> Result<()> {
        self.runner.run(&ServiceArgs::new(
            &self.config.tools.systemctl,
            action,
            &self.config.service_name,
        ))?;
        Ok(())
    }

    fn remove_data_dir(&self, data_dir: &Path) -> Result<()> {
        self.runner.run(&RemoveDirArgs {
            program: self.config.tools.rm.clone(),
            path: data_dir.to_path_buf(),
        })?;
        Ok(())
    }
}
