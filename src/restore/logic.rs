use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::{error, info, warn};
use which::which;

use crate::backup::archive::extract_tar_gz_archive;
use crate::config::BackupSet;
use crate::volume::{staging_path, Volume};

/// Restores the latest archive of every configured set. A set that fails
/// is logged and skipped so the remaining sets still get their data back;
/// the pass itself always completes.
pub async fn perform_restore_orchestration(volume: &Volume) -> Result<()> {
    info!("🚀 Starting restore pass");

    for set in &volume.config.backups {
        let Some(path) = set.path.as_ref() else {
            // Entries without a path are deliberately inert.
            continue;
        };

        info!("Restoring to {}", path.display());
        if let Err(error) = restore_backup_set(volume, set, path).await {
            error!(
                "Restore failed for backup set {} ({}): {:#}",
                set.label(),
                path.display(),
                error
            );
        }
    }

    info!("✅ Restore pass completed");
    Ok(())
}

async fn restore_backup_set(volume: &Volume, set: &BackupSet, path: &Path) -> Result<()> {
    prepare_restore_target(path, set)?;

    let Some(key) = volume.bucket.latest_key(&set.prefix).await? else {
        // No backup history for this prefix yet.
        return Ok(());
    };
    info!("Restoring from {}", key);

    let staged_archive = staging_path(&volume.config.tmp_dir, &key);
    volume
        .bucket
        .download_to_file(&key, &staged_archive)
        .await
        .with_context(|| format!("Failed to download {} for backup set {}", key, set.label()))?;

    extract_tar_gz_archive(&staged_archive, path)
        .with_context(|| format!("Failed to extract {} into {}", key, path.display()))?;
    Ok(())
}

/// Makes sure the restore target directory exists. Ownership and mode are
/// only adjusted when this call created the directory; an existing target
/// is left exactly as found.
fn prepare_restore_target(path: &Path, set: &BackupSet) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create restore target: {}", path.display()))?;

    if let Some(mode) = set.chmod.as_deref() {
        info!("chmod {}", mode);
        run_directory_command("chmod", mode, path);
    }
    if let Some(owner) = set.chown.as_deref() {
        info!("chown {}", owner);
        run_directory_command("chown", owner, path);
    }
    Ok(true)
}

/// Runs `program argument target`, treating every failure as advisory. The
/// daemon often lacks the privileges for chown, and restored data is still
/// usable without the adjustment.
fn run_directory_command(program: &str, argument: &str, target: &Path) {
    let executable = match which(program) {
        Ok(executable) => executable,
        Err(_) => {
            warn!(
                "{} is not available, skipping it for {}",
                program,
                target.display()
            );
            return;
        }
    };

    match Command::new(executable).arg(argument).arg(target).status() {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(
            "{} {} {} exited with {}",
            program,
            argument,
            target.display(),
            status
        ),
        Err(error) => warn!("Failed to run {} on {}: {}", program, target.display(), error),
    }
}
