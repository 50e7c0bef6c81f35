use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::info;

use crate::backup::archive::create_tar_gz_archive;
use crate::volume::{staging_path, Volume};

/// The object key for an archive of `prefix` taken at `now`. The timestamp
/// is fixed-width, so sorting keys lexically sorts them chronologically and
/// the maximum key is always the newest archive.
pub(crate) fn archive_key(prefix: &str, now: &DateTime<Local>) -> String {
    format!("{}-{}.tar.gz", prefix, now.format("%Y%m%d-%H%M%S"))
}

/// Archives every configured backup set and uploads the results. Sets
/// without a local path are skipped; a failure in one set aborts the pass
/// so the caller can report it.
pub async fn perform_backup_orchestration(volume: &Volume) -> Result<()> {
    info!("🚀 Starting backup pass");

    for set in &volume.config.backups {
        let Some(path) = set.path.as_ref() else {
            // Entries without a path are deliberately inert.
            continue;
        };

        let key = archive_key(&set.prefix, &Local::now());
        info!("Start backup: {} to {}", path.display(), key);

        let staged_archive = staging_path(&volume.config.tmp_dir, &key);
        create_tar_gz_archive(path, &staged_archive, |relative| set.is_excluded(relative))
            .with_context(|| {
                format!(
                    "Failed to archive {} for backup set {}",
                    path.display(),
                    set.label()
                )
            })?;

        volume
            .bucket
            .put_file(&key, &staged_archive, &set.s3_params)
            .await
            .with_context(|| {
                format!("Failed to upload archive for backup set {}", set.label())
            })?;

        info!("Done backup: {}", set.label());
    }

    info!("✅ Backup pass completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use regex::Regex;

    #[test]
    fn test_archive_key_embeds_the_timestamp() {
        let taken_at = Local.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(archive_key("app", &taken_at), "app-20230601-120000.tar.gz");
    }

    #[test]
    fn test_archive_keys_sort_chronologically() {
        let earlier = Local.with_ymd_and_hms(2023, 6, 1, 9, 59, 59).unwrap();
        let later = Local.with_ymd_and_hms(2023, 6, 1, 10, 0, 0).unwrap();
        assert!(archive_key("app", &earlier) < archive_key("app", &later));
    }

    #[test]
    fn test_archive_key_shape() {
        let key = archive_key("app", &Local::now());
        let shape = Regex::new(r"^app-\d{8}-\d{6}\.tar\.gz$").unwrap();
        assert!(shape.is_match(&key));
    }

    #[test]
    fn test_configured_exclusions_flow_through_archival() -> Result<()> {
        use crate::backup::archive::extract_tar_gz_archive;
        use crate::config::VolumeConfig;
        use std::fs;

        let workspace = tempfile::tempdir()?;
        let source = workspace.path().join("app");
        fs::create_dir_all(source.join("logs"))?;
        fs::write(source.join("a.txt"), "alpha")?;
        fs::write(source.join("logs").join("b.txt"), "beta")?;

        let config = VolumeConfig::from_yaml(&format!(
            "backups:\n  - path: {}\n    prefix: app\n    exclude: [\"^logs/\"]\n",
            source.display()
        ))?;
        let set = &config.backups[0];

        let archive = workspace.path().join(archive_key(&set.prefix, &Local::now()));
        create_tar_gz_archive(&source, &archive, |relative| set.is_excluded(relative))?;

        let target = workspace.path().join("restored");
        fs::create_dir_all(&target)?;
        extract_tar_gz_archive(&archive, &target)?;

        assert_eq!(fs::read_to_string(target.join("a.txt"))?, "alpha");
        assert!(!target.join("logs").join("b.txt").exists());
        Ok(())
    }
}
