//! Centralized path utilities for the application.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Environment variable that relocates the data directory.
pub const DATA_DIR_ENV: &str = "MCSM_DATA_DIR";

/// Get the root data directory for the application (~/.mcserver_manager).
pub fn get_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".mcserver_manager"),
        None => PathBuf::from(".mcserver_manager"),
    }
}

/// Get the path to the config file.
pub fn config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Get the path to the persisted instance records.
pub fn instances_path() -> PathBuf {
    get_data_dir().join("instances.toml")
}

/// Get the path to the template catalog.
pub fn templates_path() -> PathBuf {
    get_data_dir().join("templates.json")
}

/// Ensure all required data directories exist.
pub fn ensure_data_dirs() -> Result<()> {
    let base = get_data_dir();
    fs::create_dir_all(&base).map_err(|e| AppError::io(e.to_string()))?;

    let dirs = [get_servers_dir(), get_java_dir()];
    for dir in &dirs {
        fs::create_dir_all(dir).map_err(|e| AppError::io(e.to_string()))?;
    }
    Ok(())
}

/// Directory holding one sub-directory per server instance.
pub fn get_servers_dir() -> PathBuf {
    get_data_dir().join("servers")
}

/// Directory holding portable Java runtimes.
pub fn get_java_dir() -> PathBuf {
    get_data_dir().join("java")
}

/// Log file tailed for live console output.
pub fn latest_log_path(root: &Path) -> PathBuf {
    root.join("logs").join("latest.log")
}

pub fn server_properties_path(root: &Path) -> PathBuf {
    root.join("server.properties")
}

pub fn whitelist_path(root: &Path) -> PathBuf {
    root.join("whitelist.json")
}

pub fn eula_path(root: &Path) -> PathBuf {
    root.join("eula.txt")
}

/// Directory receiving world backups for an instance.
pub fn get_backups_dir(root: &Path) -> PathBuf {
    root.join("backups")
}
