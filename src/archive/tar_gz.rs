use std::fs;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{AppError, Result};

use super::path::{parse_entry_rel_path, resolve_within_dir, write_file};

/// Link entries are created after every regular file so their targets exist.
struct PendingLink {
    out_path: PathBuf,
    target: PathBuf,
    hard: bool,
}

impl PendingLink {
    fn create(self, dest_dir: &Path) -> Result<()> {
        if self.hard {
            let relative = self
                .target
                .to_str()
                .and_then(parse_entry_rel_path)
                .ok_or_else(|| AppError::io(format!("unsafe hard link target {:?}", self.target)))?;
            let source = resolve_within_dir(dest_dir, &relative)?;
            if fs::hard_link(&source, &self.out_path).is_err() {
                fs::copy(&source, &self.out_path).map_err(|e| AppError::io(e.to_string()))?;
            }
            return Ok(());
        }

        if self.target.is_absolute() {
            return Err(AppError::io(format!(
                "absolute symlink target {:?} is not allowed",
                self.target
            )));
        }
        let parent = self
            .out_path
            .parent()
            .ok_or_else(|| AppError::io("symlink entry has no parent directory"))?;
        let resolved = resolve_within_dir(dest_dir, &parent.join(&self.target))?;
        fs::create_dir_all(parent).map_err(|e| AppError::io(e.to_string()))?;
        make_symlink(&self.target, &resolved, &self.out_path)
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, _resolved: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .map_err(|e| AppError::io(format!("failed to create symlink at {link:?}: {e}")))
}

#[cfg(not(unix))]
fn make_symlink(_target: &Path, resolved: &Path, link: &Path) -> Result<()> {
    if resolved.is_file() {
        fs::copy(resolved, link).map_err(|e| AppError::io(e.to_string()))?;
    } else {
        log::debug!("Skipping directory symlink {:?}", link);
    }
    Ok(())
}

/// Extract a gzip-compressed tarball under `dest_dir`.
pub fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    fs::create_dir_all(dest_dir).map_err(|e| AppError::io(e.to_string()))?;
    let file = fs::File::open(archive_path).map_err(|e| AppError::io(e.to_string()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut links = Vec::new();

    for entry in archive.entries().map_err(|e| AppError::io(e.to_string()))? {
        let mut entry = entry.map_err(|e| AppError::io(e.to_string()))?;
        let raw = entry
            .path()
            .map_err(|e| AppError::io(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        let entry_type = entry.header().entry_type();

        let Some(relative) = parse_entry_rel_path(&raw) else {
            if entry_type.is_dir() {
                // "./" roots show up in some tarballs.
                continue;
            }
            return Err(AppError::io(format!(
                "archive contains unsafe entry path: {raw:?}"
            )));
        };
        let out_path = resolve_within_dir(dest_dir, &relative)?;

        if entry_type.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| AppError::io(e.to_string()))?;
        } else if entry_type.is_file() {
            let mode = entry.header().mode().ok();
            write_file(&out_path, &mut entry, mode)?;
        } else if entry_type.is_symlink() || entry_type.is_hard_link() {
            let target = entry
                .link_name()
                .map_err(|e| AppError::io(e.to_string()))?
                .ok_or_else(|| AppError::io(format!("link entry {raw:?} has no target")))?
                .into_owned();
            links.push(PendingLink {
                out_path,
                target,
                hard: entry_type.is_hard_link(),
            });
        } else {
            log::debug!("Skipping tar entry {:?} of type {:?}", raw, entry_type);
        }
    }

    for link in links {
        link.create(dest_dir)?;
    }
    Ok(())
}

/// Pack the named top-level directories of `root` into a new tar.gz at
/// `dest`. Names that do not exist are skipped. Returns how many were packed.
pub fn create_tar_gz(root: &Path, names: &[&str], dest: &Path) -> Result<usize> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::io(e.to_string()))?;
    }
    let file = fs::File::create(dest).map_err(|e| AppError::io(e.to_string()))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    let mut packed = 0;
    for name in names {
        let source = root.join(name);
        if !source.is_dir() {
            continue;
        }
        builder
            .append_dir_all(name, &source)
            .map_err(|e| AppError::io(format!("failed to archive {name}: {e}")))?;
        packed += 1;
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(|e| AppError::io(e.to_string()))?;
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_and_unpacks_existing_dirs_only() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("server");
        fs::create_dir_all(root.join("world/region")).unwrap();
        fs::write(root.join("world/level.dat"), b"level").unwrap();
        fs::write(root.join("world/region/r.0.0.mca"), b"chunk").unwrap();

        let archive = tmp.path().join("out/world_backup.tar.gz");
        let packed = create_tar_gz(&root, &["world", "world_nether"], &archive).unwrap();
        assert_eq!(packed, 1);

        let dest = tmp.path().join("restore");
        extract_tar_gz(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("world/level.dat")).unwrap(), b"level");
        assert_eq!(fs::read(dest.join("world/region/r.0.0.mca")).unwrap(), b"chunk");
        assert!(!dest.join("world_nether").exists());
    }

    #[cfg(unix)]
    #[test]
    fn keeps_executable_bit() {
        use std::os::unix::fs::PermissionsExt as _;

        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("jdk");
        fs::create_dir_all(root.join("bin")).unwrap();
        let java = root.join("bin/java");
        fs::write(&java, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&java, fs::Permissions::from_mode(0o755)).unwrap();

        let archive = tmp.path().join("jdk.tar.gz");
        create_tar_gz(&root, &["bin"], &archive).unwrap();
        let dest = tmp.path().join("unpacked");
        extract_tar_gz(&archive, &dest).unwrap();

        let mode = fs::metadata(dest.join("bin/java")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
