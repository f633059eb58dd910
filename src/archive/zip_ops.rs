use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};

use super::path::{parse_entry_rel_path, resolve_within_dir, write_file};

/// Extract a zip archive under `dest_dir`. Symlink entries are skipped.
pub fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    fs::create_dir_all(dest_dir).map_err(|e| AppError::io(e.to_string()))?;
    let file = fs::File::open(archive_path).map_err(|e| AppError::io(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(file)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let raw = entry.name().to_string();
        let relative = parse_entry_rel_path(&raw)
            .ok_or_else(|| AppError::io(format!("archive contains unsafe zip path: {raw:?}")))?;
        let out_path = resolve_within_dir(dest_dir, &relative)?;

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| AppError::io(e.to_string()))?;
        } else if entry.is_symlink() {
            log::debug!("Skipping zip symlink {:?}", raw);
        } else {
            let mode = entry.unix_mode();
            write_file(&out_path, &mut entry, mode)?;
        }
    }

    Ok(())
}
