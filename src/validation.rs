use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::paths::get_backups_dir;

pub fn validate_instance_id(instance_id: &str) -> Result<()> {
    if uuid::Uuid::parse_str(instance_id).is_err() {
        return Err(AppError::other("Invalid instance id"));
    }
    Ok(())
}

/// Server names become directory names under the servers dir.
pub fn validate_server_name(name: &str) -> Result<()> {
    let is_safe = !name.trim().is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '));

    if !is_safe {
        return Err(AppError::other(format!("Invalid server name: {name:?}")));
    }

    Ok(())
}

/// Resolve a backup file name inside an instance's backups directory.
pub fn resolve_backup_path(root: &Path, backup_name: &str, require_exists: bool) -> Result<PathBuf> {
    let backups_dir = get_backups_dir(root);
    let backups_dir_canonical = ensure_and_canonicalize_dir(&backups_dir, "backups")?;

    let file_name = Path::new(backup_name)
        .file_name()
        .ok_or_else(|| AppError::backup("Invalid backup path"))?;

    let candidate = backups_dir.join(file_name);

    if !is_backup_filename(&candidate) {
        return Err(AppError::backup("Invalid backup filename"));
    }

    if !candidate.exists() {
        if require_exists {
            return Err(AppError::backup(format!("Backup not found: {backup_name}")));
        }
        return Ok(candidate);
    }

    let canonical_candidate = candidate
        .canonicalize()
        .map_err(|e| AppError::backup(format!("Failed to resolve backup path: {}", e)))?;

    if !canonical_candidate.starts_with(&backups_dir_canonical) {
        return Err(AppError::backup("Backup path is outside backups directory"));
    }

    Ok(canonical_candidate)
}

fn ensure_and_canonicalize_dir(path: &Path, label: &str) -> Result<PathBuf> {
    fs::create_dir_all(path)
        .map_err(|e| AppError::io(format!("Failed to create {} dir: {}", label, e)))?;
    path.canonicalize()
        .map_err(|e| AppError::io(format!("Failed to resolve {} dir: {}", label, e)))
}

pub(crate) fn is_backup_filename(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| {
            let name = name.to_ascii_lowercase();
            name.starts_with("world_backup_") && (name.ends_with(".tar.gz") || name.ends_with(".zip"))
        })
        .unwrap_or(false)
}
