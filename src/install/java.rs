//! Java runtime resolution: system probe, cached portable runtimes and
//! on-demand Temurin downloads.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;

use super::steps::LineSink;
use crate::archive::extract_archive;
use crate::download::Downloader;
use crate::error::{AppError, Result};
use crate::platform::{get_temurin_target, temurin_url};

const DEFAULT_REQUIRED_MAJOR: u32 = 17;
const DEFAULT_PROBED_MAJOR: u32 = 8;
/// Highest major version a cached runtime is reused for.
const MAX_CACHED_MAJOR: u32 = 25;
/// `bin/java` sits under `jdk-x/` on Linux and Windows and under
/// `jdk-x/Contents/Home/` on macOS.
const JAVA_SEARCH_DEPTH: usize = 5;

/// Supplies a Java executable that satisfies a template's requirement.
#[async_trait::async_trait]
pub trait JavaProvider: Send + Sync {
    /// `None` means the system `java` on PATH is good enough.
    async fn ensure_java(&self, requirement: Option<&str>, progress: &LineSink<'_>) -> Result<Option<PathBuf>>;
}

/// Major version named by a requirement such as `"Java 21+"`.
pub fn required_major(requirement: Option<&str>) -> u32 {
    let Some(text) = requirement else {
        return DEFAULT_REQUIRED_MAJOR;
    };
    if !text.to_lowercase().contains("java") {
        return DEFAULT_REQUIRED_MAJOR;
    }
    text.split_whitespace()
        .map(|part| part.chars().filter(char::is_ascii_digit).collect::<String>())
        .find_map(|digits| digits.parse().ok())
        .unwrap_or(DEFAULT_REQUIRED_MAJOR)
}

/// Major version from `java -version` output. Legacy `1.x` strings map to `x`.
pub fn parse_java_version(output: &str) -> u32 {
    let Some(start) = output.find("version \"") else {
        return DEFAULT_PROBED_MAJOR;
    };
    let rest = &output[start + "version \"".len()..];
    let version = rest.split('"').next().unwrap_or_default();
    let mut parts = version.split(['.', '-', '+', '_']);
    let major = match (parts.next(), parts.next()) {
        (Some("1"), Some(minor)) => minor.parse().ok(),
        (Some(first), _) => first.parse().ok(),
        _ => None,
    };
    major.unwrap_or(DEFAULT_PROBED_MAJOR)
}

/// Portable major installed for a requirement: 21 for 21 and up, else 17.
pub fn portable_major(required: u32) -> u32 {
    if required >= 21 {
        21
    } else {
        17
    }
}

/// `java.<major>.path=<exe>` entries remembered between installs.
struct JavaPathCache {
    file: PathBuf,
}

impl JavaPathCache {
    fn read(&self) -> BTreeMap<u32, PathBuf> {
        let Ok(content) = fs::read_to_string(&self.file) else {
            return BTreeMap::new();
        };
        content
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .filter_map(|(key, value)| {
                let major = key.trim().strip_prefix("java.")?.strip_suffix(".path")?;
                Some((major.parse().ok()?, PathBuf::from(value.trim())))
            })
            .collect()
    }

    fn lookup(&self, required: u32) -> Option<PathBuf> {
        let entries = self.read();
        (required..=MAX_CACHED_MAJOR)
            .filter_map(|major| entries.get(&major))
            .find(|path| path.exists())
            .cloned()
    }

    fn store(&self, major: u32, path: &Path) -> Result<()> {
        let mut entries = self.read();
        entries.insert(major, path.to_path_buf());
        let mut content = String::from("#Java installation paths\n");
        for (major, path) in &entries {
            content.push_str(&format!("java.{}.path={}\n", major, path.display()));
        }
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent).map_err(|e| AppError::io(e.to_string()))?;
        }
        fs::write(&self.file, content).map_err(|e| AppError::io(e.to_string()))
    }
}

/// Locate `bin/java` (or `bin/java.exe`) under an unpacked JDK.
pub fn find_java_executable(root: &Path) -> Result<PathBuf> {
    for entry in walkdir::WalkDir::new(root).max_depth(JAVA_SEARCH_DEPTH) {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy();
        let in_bin = entry
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n == "bin")
            .unwrap_or(false);
        if in_bin && (name == "java" || name == "java.exe") && !entry.file_type().is_dir() {
            return Ok(entry.path().to_path_buf());
        }
    }
    Err(AppError::io(format!(
        "Could not find java executable in {}",
        root.display()
    )))
}

pub struct JavaManager {
    downloader: Arc<dyn Downloader>,
    java_dir: PathBuf,
    java_command: String,
    probe_timeout: Duration,
}

impl JavaManager {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        java_dir: PathBuf,
        java_command: &str,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            downloader,
            java_dir,
            java_command: java_command.to_string(),
            probe_timeout,
        }
    }

    fn cache(&self) -> JavaPathCache {
        JavaPathCache {
            file: self.java_dir.join("java-paths.properties"),
        }
    }

    /// Major version of the system Java, or `None` if it is missing or broken.
    pub async fn probe_system_java(&self) -> Option<u32> {
        let output = Command::new(&self.java_command)
            .arg("-version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(self.probe_timeout, output).await {
            Ok(Ok(output)) if output.status.success() => {
                let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stdout));
                Some(parse_java_version(&text))
            }
            Ok(Ok(output)) => {
                log::debug!("System Java check exited with {}", output.status);
                None
            }
            Ok(Err(e)) => {
                log::debug!("System Java check failed: {}", e);
                None
            }
            Err(_) => {
                log::debug!("System Java check timed out");
                None
            }
        }
    }

    async fn install_portable(&self, major: u32, progress: &LineSink<'_>) -> Result<PathBuf> {
        let url = temurin_url(major).map_err(AppError::other)?;
        let (_, _, ext) = get_temurin_target().map_err(AppError::other)?;
        fs::create_dir_all(&self.java_dir).map_err(|e| AppError::io(e.to_string()))?;

        let archive_path = self.java_dir.join(format!("java{}.{}", major, ext));
        let extract_dir = self.java_dir.join(format!("java{}", major));

        progress(&format!("Downloading: {}", url));
        self.downloader.download(&url, &archive_path).await?;
        if let Ok(meta) = fs::metadata(&archive_path) {
            progress(&format!("Downloaded {}", format_file_size(meta.len())));
        }

        if extract_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&extract_dir) {
                log::warn!("Failed to clean java dir {:?}: {}", extract_dir, e);
            }
        }

        progress("Extracting Java archive...");
        let (archive, dest) = (archive_path.clone(), extract_dir.clone());
        tokio::task::spawn_blocking(move || extract_archive(&archive, &dest))
            .await
            .map_err(|e| AppError::io(e.to_string()))??;

        let java = find_java_executable(&extract_dir)?;

        if let Err(e) = fs::remove_file(&archive_path) {
            log::warn!("Failed to remove archive {:?}: {}", archive_path, e);
        }

        if let Err(e) = self.cache().store(major, &java) {
            log::warn!("Failed to store Java path: {}", e);
        } else {
            log::info!("Stored Java {} path: {:?}", major, java);
        }
        Ok(java)
    }
}

#[async_trait::async_trait]
impl JavaProvider for JavaManager {
    async fn ensure_java(&self, requirement: Option<&str>, progress: &LineSink<'_>) -> Result<Option<PathBuf>> {
        let required = required_major(requirement);
        progress(&format!("Java requirement: Java {}+", required));

        if let Some(system) = self.probe_system_java().await {
            if system >= required {
                progress(&format!("System Java {} satisfies requirement", system));
                return Ok(None);
            }
        }

        if let Some(cached) = self.cache().lookup(required) {
            progress(&format!(
                "Found existing portable Java at: {}",
                cached.display()
            ));
            return Ok(Some(cached));
        }

        let major = portable_major(required);
        progress(&format!(
            "Java {}+ not available, setting up portable Java {}...",
            required, major
        ));
        let java = self.install_portable(major, progress).await?;
        progress(&format!("Portable Java {} ready at: {}", major, java.display()));
        Ok(Some(java))
    }
}

fn format_file_size(bytes: u64) -> String {
    if bytes >= 1_000_000 {
        format!("{:.1} MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.1} KB", bytes as f64 / 1_000.0)
    } else {
        format!("{} bytes", bytes)
    }
}
