//! Archive handling for runtime downloads and world backups.

mod path;
mod tar_gz;
mod zip_ops;

use std::path::Path;

use crate::error::{AppError, Result};

pub use path::parse_entry_rel_path;
pub use tar_gz::{create_tar_gz, extract_tar_gz};
pub use zip_ops::extract_zip;

/// Unpack `archive_path` into `dest_dir`, choosing the format by extension.
/// Entry layout is kept as-is; no top-level directory is stripped.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let name = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_gz(archive_path, dest_dir)
    } else if name.ends_with(".zip") {
        extract_zip(archive_path, dest_dir)
    } else {
        Err(AppError::io(format!("Unsupported archive format: {name}")))
    }
}
