use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::archive::create_tar_gz;
use crate::error::{AppError, Result};
use crate::paths::get_backups_dir;
use crate::validation::{is_backup_filename, resolve_backup_path};

/// World directories included in a backup, when present.
const WORLD_DIRS: [&str; 3] = ["world", "world_nether", "world_the_end"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub freed_bytes: u64,
}

impl CleanupReport {
    pub fn freed_mb(&self) -> f64 {
        self.freed_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Archive the world directories of a server root into
/// `backups/world_backup_<yyyy-MM-dd_HH-mm-ss>.tar.gz`.
pub fn backup_world(root: &Path) -> Result<PathBuf> {
    let backups_dir = get_backups_dir(root);
    fs::create_dir_all(&backups_dir)
        .map_err(|e| AppError::backup(format!("Failed to create backups dir: {}", e)))?;

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let backup_path = backups_dir.join(format!("world_backup_{}.tar.gz", timestamp));

    let packed = create_tar_gz(root, &WORLD_DIRS, &backup_path)
        .map_err(|e| AppError::backup(format!("Failed to create backup archive: {}", e.message())))?;
    if packed == 0 {
        if let Err(e) = fs::remove_file(&backup_path) {
            log::warn!("Failed to remove empty backup {:?}: {}", backup_path, e);
        }
        return Err(AppError::backup("No world directories to back up"));
    }

    log::info!("World backup created: {:?}", backup_path);
    Ok(backup_path)
}

/// Backups of one server root, newest first.
pub fn list_backups(root: &Path) -> Result<Vec<BackupInfo>> {
    let backups_dir = get_backups_dir(root);
    if !backups_dir.exists() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    for entry in fs::read_dir(&backups_dir)
        .map_err(|e| AppError::backup(format!("Failed to read backups dir: {}", e)))?
    {
        let entry = entry.map_err(|e| AppError::backup(e.to_string()))?;
        let path = entry.path();
        if !path.is_file() || !is_backup_filename(&path) {
            continue;
        }
        let meta = entry.metadata().map_err(|e| AppError::backup(e.to_string()))?;
        let created_at = meta
            .modified()
            .map(|t| DateTime::<Local>::from(t).to_rfc3339())
            .unwrap_or_default();
        backups.push(BackupInfo {
            filename: entry.file_name().to_string_lossy().into_owned(),
            path,
            size: meta.len(),
            created_at,
        });
    }

    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(backups)
}

pub fn delete_backup(root: &Path, backup_name: &str) -> Result<()> {
    let path = resolve_backup_path(root, backup_name, true)?;
    fs::remove_file(&path)
        .map_err(|e| AppError::backup(format!("Failed to delete backup: {}", e)))
}

/// Delete backups last modified more than `retention_days` ago.
pub fn cleanup_old_backups(root: &Path, retention_days: i64) -> Result<CleanupReport> {
    let backups_dir = get_backups_dir(root);
    let mut report = CleanupReport::default();
    if !backups_dir.exists() {
        return Ok(report);
    }

    let cutoff = Local::now() - chrono::Duration::days(retention_days);
    log::info!(
        "Cleaning backups in {:?} older than {} days (before {})",
        backups_dir,
        retention_days,
        cutoff
    );

    for entry in fs::read_dir(&backups_dir)
        .map_err(|e| AppError::backup(format!("Failed to read backups dir: {}", e)))?
    {
        let entry = entry.map_err(|e| AppError::backup(e.to_string()))?;
        let path = entry.path();
        if !path.is_file() || !is_backup_filename(&path) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let modified = match meta.modified() {
            Ok(t) => DateTime::<Local>::from(t),
            Err(e) => {
                log::debug!("Error getting modification time for {:?}: {}", path, e);
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                report.deleted += 1;
                report.freed_bytes += meta.len();
                log::debug!("Deleted old backup {:?} ({} bytes)", path, meta.len());
            }
            Err(e) => log::warn!("Failed to delete backup file {:?}: {}", path, e),
        }
    }

    Ok(report)
}
