use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{AppError, Result};

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Turn an archive entry name into a relative path. Absolute names, drive
/// prefixes and any `..` segment are rejected.
pub fn parse_entry_rel_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => relative.push(part),
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// Canonicalize the deepest existing ancestor and re-append the rest.
fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf> {
    let mut lexical = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => lexical.push(component.as_os_str()),
            Component::CurDir => {}
            Component::Normal(segment) => lexical.push(segment),
            Component::ParentDir => {
                if !lexical.pop() {
                    return Err(AppError::io(format!("path {path:?} escapes the filesystem root")));
                }
            }
        }
    }

    let mut current = lexical.clone();
    let mut missing = Vec::new();
    loop {
        match current.canonicalize() {
            Ok(mut resolved) => {
                for part in missing.into_iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(name) = current.file_name().map(|n| n.to_owned()) else {
                    return Err(AppError::io(format!("failed to resolve {lexical:?}")));
                };
                missing.push(name);
                if !current.pop() {
                    return Err(AppError::io(format!("failed to resolve {lexical:?}")));
                }
            }
            Err(e) => return Err(AppError::io(format!("failed to resolve {current:?}: {e}"))),
        }
    }
}

/// Resolve `relative` under `base_dir`, refusing anything that lands outside it.
pub(super) fn resolve_within_dir(base_dir: &Path, relative: &Path) -> Result<PathBuf> {
    let base = base_dir
        .canonicalize()
        .map_err(|e| AppError::io(format!("failed to resolve extraction dir: {e}")))?;
    let candidate = canonicalize_existing_prefix(&base.join(relative))?;
    if !candidate.starts_with(&base) {
        return Err(AppError::io(format!(
            "archive entry {relative:?} resolves outside the extraction dir"
        )));
    }
    Ok(candidate)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| AppError::io(format!("failed to set permissions on {path:?}: {e}")))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

/// Stream one file entry to disk, creating parents and restoring the mode bits.
pub(super) fn write_file<R: io::Read>(out_path: &Path, reader: &mut R, mode: Option<u32>) -> Result<()> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io(format!("failed to create directory {parent:?}: {e}")))?;
    }
    let mut out = fs::File::create(out_path).map_err(|e| AppError::io(e.to_string()))?;
    io::copy(reader, &mut out).map_err(|e| AppError::io(e.to_string()))?;
    apply_mode(out_path, mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_paths_must_stay_relative() {
        assert_eq!(
            parse_entry_rel_path("jdk-17/bin/java"),
            Some(PathBuf::from("jdk-17").join("bin").join("java"))
        );
        assert_eq!(parse_entry_rel_path("./a//b"), Some(PathBuf::from("a").join("b")));
        assert!(parse_entry_rel_path("../etc/passwd").is_none());
        assert!(parse_entry_rel_path("a/../../b").is_none());
        assert!(parse_entry_rel_path("/abs").is_none());
        assert!(parse_entry_rel_path("C:\\Windows").is_none());
        assert!(parse_entry_rel_path("./").is_none());
    }

    #[test]
    fn resolution_is_contained() {
        let tmp = tempfile::tempdir().unwrap();
        let inside = resolve_within_dir(tmp.path(), Path::new("a/b/c.txt")).unwrap();
        assert!(inside.starts_with(tmp.path().canonicalize().unwrap()));
        assert!(resolve_within_dir(tmp.path(), Path::new("../outside")).is_err());
    }
}
