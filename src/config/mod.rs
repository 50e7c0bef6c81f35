// volumetool/src/config/mod.rs
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::storage::Bucket;

// Structs for deserializing the YAML configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct RawBackupSet {
    pub path: Option<PathBuf>,
    pub prefix: Option<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub s3: HashMap<String, String>,
    pub chmod: Option<String>,
    pub chown: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawVolumeConfig {
    pub tmp: Option<PathBuf>,
    #[serde(default)]
    pub backups: Vec<RawBackupSet>,
}

/// One configured path-to-archive mapping, validated and with its exclusion
/// patterns compiled.
#[derive(Debug)]
pub struct BackupSet {
    /// Local directory to back up. Entries without a path are inert: both
    /// the backup and the restore pass skip them without complaint.
    pub path: Option<PathBuf>,
    /// Key prefix of every archive of this set, and the selection key for
    /// "latest" during restore. May be empty on inert entries.
    pub prefix: String,
    /// Exclusion patterns, matched against root-relative paths in order.
    pub exclude: Vec<Regex>,
    /// Store parameters forwarded to the upload; never interpreted by the
    /// orchestration code.
    pub s3_params: HashMap<String, String>,
    /// Mode applied to the restore target, only when this process creates it.
    pub chmod: Option<String>,
    /// Ownership applied to the restore target, only when this process
    /// creates it.
    pub chown: Option<String>,
    /// Human label for log lines.
    pub name: Option<String>,
}

/// The whole backup-set description the daemon runs from.
#[derive(Debug)]
pub struct VolumeConfig {
    /// Workspace where archives are staged before upload and after download.
    pub tmp_dir: PathBuf,
    /// Configured sets, in document order.
    pub backups: Vec<BackupSet>,
}

impl BackupSet {
    /// Label used in log lines; entries without a name fall back to the
    /// prefix.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.prefix)
    }

    /// Whether a root-relative path is excluded from this set's archives.
    /// Patterns are matched at the start of the path; the first match wins.
    pub fn is_excluded(&self, relative_path: &Path) -> bool {
        let candidate = relative_path.to_string_lossy();
        self.exclude.iter().any(|pattern| pattern.is_match(&candidate))
    }
}

impl VolumeConfig {
    /// Fetches the configuration document from the bucket and compiles it.
    /// A missing document, unparsable YAML, or an invalid exclusion pattern
    /// is fatal: the daemon must not serve with a partial backup-set list.
    pub async fn fetch(bucket: &Bucket, config_key: &str) -> Result<Self> {
        let document = bucket.get_object_string(config_key).await.with_context(|| {
            format!("Cannot find {} in the bucket {}", config_key, bucket.name())
        })?;
        Self::from_yaml(&document)
            .with_context(|| format!("Invalid backup configuration at {}", config_key))
    }

    pub fn from_yaml(document: &str) -> Result<Self> {
        let raw: RawVolumeConfig = serde_yaml::from_str(document)
            .context("Failed to parse the backup configuration as YAML")?;

        let backups = raw
            .backups
            .into_iter()
            .map(compile_backup_set)
            .collect::<Result<Vec<_>>>()?;

        Ok(VolumeConfig {
            tmp_dir: raw.tmp.unwrap_or_else(std::env::temp_dir),
            backups,
        })
    }
}

fn compile_backup_set(raw: RawBackupSet) -> Result<BackupSet> {
    let prefix = raw.prefix.unwrap_or_default();
    // Inert entries (no path) never touch the bucket, so they may omit the
    // prefix too; an active entry without one has nowhere to put archives.
    if raw.path.is_some() && prefix.trim().is_empty() {
        return Err(anyhow::anyhow!(
            "Backup entry {} has no prefix; the prefix names the set's archives in the bucket",
            raw.name.as_deref().unwrap_or("<unnamed>")
        ));
    }

    let exclude = raw
        .exclude
        .iter()
        .map(|pattern| compile_exclude_pattern(pattern))
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("Invalid exclude list for backup prefix {prefix}"))?;

    Ok(BackupSet {
        path: raw.path,
        prefix,
        exclude,
        s3_params: raw.s3,
        chmod: raw.chmod,
        chown: raw.chown,
        name: raw.name,
    })
}

/// Exclusion patterns match at the start of the relative path, not anywhere
/// inside it, so `logs/` excludes the top-level logs directory but not a
/// nested `data/logs/`.
fn compile_exclude_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})"))
        .with_context(|| format!("Invalid exclude pattern: {pattern}"))
}
