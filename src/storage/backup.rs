use crate::common::{GreeterError, Result};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const BACKUP_INFO_FILE: &str = "backup_info.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackupInfo {
    pub timestamp: DateTime<Utc>,
    pub known_faces: usize,
    pub unknown_faces: usize,
}

fn copy_dir(src: &Path, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest)?;
    if !src.exists() {
        return Ok(0);
    }

    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let target = dest.join(entry.file_name());
        if path.is_dir() {
            copied += copy_dir(&path, &target)?;
        } else {
            fs::copy(&path, &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn count_with_extension(dir: &Path, extensions: &[&str]) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if matches {
            count += 1;
        }
    }
    Ok(count)
}

/// Copies both face directories into `<backups_dir>/<timestamp>/` and writes
/// a `backup_info.json` summary next to them.
pub fn create_backup(
    backups_dir: &Path,
    known_dir: &Path,
    unknown_dir: &Path,
    now: DateTime<Utc>,
) -> Result<(PathBuf, BackupInfo)> {
    let dest = backups_dir.join(now.format("%Y%m%d_%H%M%S").to_string());
    if dest.exists() {
        return Err(GreeterError::Storage(format!("Backup {} already exists", dest.display())));
    }

    copy_dir(known_dir, &dest.join("known_faces"))?;
    copy_dir(unknown_dir, &dest.join("unknown_faces"))?;

    let info = BackupInfo {
        timestamp: now,
        known_faces: count_with_extension(known_dir, crate::storage::known_faces::KNOWN_FACE_EXTENSIONS)?,
        unknown_faces: count_with_extension(unknown_dir, &["json"])?,
    };
    fs::write(dest.join(BACKUP_INFO_FILE), serde_json::to_string_pretty(&info)?)?;

    tracing::info!("Backup written to {}", dest.display());
    Ok((dest, info))
}
