use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::backup;
use crate::config::VolumeConfig;
use crate::restore;
use crate::storage::Bucket;

/// Everything one running daemon needs: the validated configuration, the
/// bucket handle, and the gate that keeps backup passes from overlapping.
pub struct Volume {
    pub config: VolumeConfig,
    pub bucket: Bucket,
    backup_gate: Mutex<()>,
}

impl Volume {
    pub fn new(config: VolumeConfig, bucket: Bucket) -> Result<Self> {
        fs::create_dir_all(&config.tmp_dir).with_context(|| {
            format!(
                "Failed to create the staging workspace: {}",
                config.tmp_dir.display()
            )
        })?;
        Ok(Volume {
            config,
            bucket,
            backup_gate: Mutex::new(()),
        })
    }

    /// Runs one backup pass over every configured set. Passes are
    /// serialized: a trigger that arrives while a pass is running waits for
    /// the gate instead of starting a second archive of the same paths.
    pub async fn backup(&self) -> Result<()> {
        let _gate = self.backup_gate.lock().await;
        backup::run_backup_flow(self).await
    }

    /// Restores the latest archive of every configured set.
    pub async fn restore(&self) -> Result<()> {
        restore::run_restore_flow(self).await
    }
}

/// Where an archive with `archive_key` is staged on local disk. Keys may
/// contain prefix directories ("nightly/app-..."), so only the final
/// component names the staged file.
pub fn staging_path(tmp_dir: &Path, archive_key: &str) -> PathBuf {
    let file_name = Path::new(archive_key)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(archive_key));
    tmp_dir.join(file_name)
}
