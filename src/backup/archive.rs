// volumetool/src/backup/archive.rs
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Creates a gzipped tar archive of `source_dir` at `archive_dest_path`.
///
/// Entries are stored relative to `source_dir`, so extracting into a target
/// directory recreates the directory's contents without a wrapping
/// component. `is_excluded` is called with each entry's relative path; a
/// `true` return drops the entry, and for directories the whole subtree
/// under it.
pub fn create_tar_gz_archive(
    source_dir: &Path,
    archive_dest_path: &Path,
    is_excluded: impl Fn(&Path) -> bool,
) -> Result<()> {
    if !source_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Source for archival is not a directory: {}",
            source_dir.display()
        ));
    }
    if let Some(parent_dir) = archive_dest_path.parent() {
        if !parent_dir.exists() {
            fs::create_dir_all(parent_dir).with_context(|| {
                format!(
                    "Failed to create parent directory for archive: {}",
                    parent_dir.display()
                )
            })?;
        }
    }

    debug!(
        "Creating tar.gz archive from {} to {}",
        source_dir.display(),
        archive_dest_path.display()
    );

    let archive_file = File::create(archive_dest_path).with_context(|| {
        format!(
            "Failed to create archive file: {}",
            archive_dest_path.display()
        )
    })?;
    let gz_encoder = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = tar::Builder::new(gz_encoder);
    tar_builder.follow_symlinks(false);

    let walker = WalkDir::new(source_dir).into_iter().filter_entry(|entry| {
        // Pruning an excluded directory here skips walking its subtree.
        match entry.path().strip_prefix(source_dir) {
            Ok(relative) => relative.as_os_str().is_empty() || !is_excluded(relative),
            Err(_) => true,
        }
    });

    for entry in walker {
        let entry =
            entry.with_context(|| format!("Failed to walk source: {}", source_dir.display()))?;
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .with_context(|| format!("Failed to walk source: {}", source_dir.display()))?;
        if relative.as_os_str().is_empty() {
            // The source directory itself; only its contents are stored.
            continue;
        }

        if entry.file_type().is_dir() {
            tar_builder
                .append_dir(relative, entry.path())
                .with_context(|| {
                    format!("Failed to add directory to archive: {}", relative.display())
                })?;
        } else {
            tar_builder
                .append_path_with_name(entry.path(), relative)
                .with_context(|| {
                    format!("Failed to add file to archive: {}", relative.display())
                })?;
        }
    }

    let gz_encoder = tar_builder
        .into_inner()
        .context("Failed to finish writing tar archive")?;
    gz_encoder
        .finish()
        .context("Failed to finish gzip compression")?;
    Ok(())
}

/// Unpacks a gzipped tar archive into `extract_to_dir`, creating the
/// directory when missing and preserving the recorded permissions. Files
/// already present in the target keep their content unless the archive
/// carries an entry with the same name.
pub fn extract_tar_gz_archive(archive_path: &Path, extract_to_dir: &Path) -> Result<()> {
    if !archive_path.is_file() {
        return Err(anyhow::anyhow!(
            "Archive for extraction is not a file: {}",
            archive_path.display()
        ));
    }
    if !extract_to_dir.exists() {
        fs::create_dir_all(extract_to_dir).with_context(|| {
            format!(
                "Failed to create extraction directory: {}",
                extract_to_dir.display()
            )
        })?;
    } else if !extract_to_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Extraction path exists but is not a directory: {}",
            extract_to_dir.display()
        ));
    }

    debug!(
        "Extracting tar.gz archive from {} to {}",
        archive_path.display(),
        extract_to_dir.display()
    );

    let archive_file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive file: {}", archive_path.display()))?;
    let gz_decoder = flate2::read::GzDecoder::new(archive_file);
    let mut tar_archive = tar::Archive::new(gz_decoder);
    tar_archive.set_preserve_permissions(true);
    tar_archive.unpack(extract_to_dir).with_context(|| {
        format!(
            "Failed to unpack archive {} to {}",
            archive_path.display(),
            extract_to_dir.display()
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn write_file(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn no_exclusions(_relative: &Path) -> bool {
        false
    }

    #[test]
    fn test_round_trip_preserves_contents_without_a_wrapping_directory() -> Result<()> {
        let workspace = tempdir()?;
        let source = workspace.path().join("source");
        write_file(&source.join("a.txt"), "alpha");
        write_file(&source.join("sub").join("c.txt"), "gamma");
        fs::create_dir_all(source.join("empty"))?;

        let archive = workspace.path().join("source.tar.gz");
        create_tar_gz_archive(&source, &archive, no_exclusions)?;

        let target = workspace.path().join("target");
        fs::create_dir_all(&target)?;
        extract_tar_gz_archive(&archive, &target)?;

        assert_eq!(fs::read_to_string(target.join("a.txt"))?, "alpha");
        assert_eq!(fs::read_to_string(target.join("sub").join("c.txt"))?, "gamma");
        assert!(target.join("empty").is_dir());
        assert!(!target.join("source").exists());
        Ok(())
    }

    #[test]
    fn test_excluded_entries_are_left_out_of_the_archive() -> Result<()> {
        let workspace = tempdir()?;
        let source = workspace.path().join("source");
        write_file(&source.join("a.txt"), "alpha");
        write_file(&source.join("logs").join("b.txt"), "beta");
        write_file(&source.join("logs").join("nested").join("d.txt"), "delta");

        let archive = workspace.path().join("source.tar.gz");
        create_tar_gz_archive(&source, &archive, |relative| {
            relative.to_string_lossy().starts_with("logs/")
        })?;

        let target = workspace.path().join("target");
        fs::create_dir_all(&target)?;
        extract_tar_gz_archive(&archive, &target)?;

        assert_eq!(fs::read_to_string(target.join("a.txt"))?, "alpha");
        assert!(target.join("logs").is_dir());
        assert!(!target.join("logs").join("b.txt").exists());
        assert!(!target.join("logs").join("nested").exists());
        Ok(())
    }

    #[test]
    fn test_excluding_a_directory_prunes_its_whole_subtree() -> Result<()> {
        let workspace = tempdir()?;
        let source = workspace.path().join("source");
        write_file(&source.join("a.txt"), "alpha");
        write_file(&source.join("logs").join("b.txt"), "beta");

        let archive = workspace.path().join("source.tar.gz");
        create_tar_gz_archive(&source, &archive, |relative| {
            relative == Path::new("logs")
        })?;

        let target = workspace.path().join("target");
        fs::create_dir_all(&target)?;
        extract_tar_gz_archive(&archive, &target)?;

        assert_eq!(fs::read_to_string(target.join("a.txt"))?, "alpha");
        assert!(!target.join("logs").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_survive_the_round_trip_as_symlinks() -> Result<()> {
        let workspace = tempdir()?;
        let source = workspace.path().join("source");
        write_file(&source.join("a.txt"), "alpha");
        std::os::unix::fs::symlink("a.txt", source.join("link"))?;

        let archive = workspace.path().join("source.tar.gz");
        create_tar_gz_archive(&source, &archive, no_exclusions)?;

        let target = workspace.path().join("target");
        fs::create_dir_all(&target)?;
        extract_tar_gz_archive(&archive, &target)?;

        let metadata = fs::symlink_metadata(target.join("link"))?;
        assert!(metadata.file_type().is_symlink());
        Ok(())
    }

    #[test]
    fn test_archiving_a_missing_source_is_an_error() {
        let workspace = tempdir().unwrap();
        let missing = workspace.path().join("missing");
        let archive = workspace.path().join("missing.tar.gz");
        let result = create_tar_gz_archive(&missing, &archive, no_exclusions);
        assert!(result.is_err());
    }

    #[test]
    fn test_extracting_a_missing_archive_is_an_error() {
        let workspace = tempdir().unwrap();
        let target = workspace.path().join("target");
        fs::create_dir_all(&target).unwrap();
        let missing = PathBuf::from(workspace.path()).join("missing.tar.gz");
        let result = extract_tar_gz_archive(&missing, &target);
        assert!(result.is_err());
    }
}
