//! Instance-related type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Installation and lifecycle state persisted on each instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    PendingInstallation,
    Downloading,
    RunningInstaller,
    Configuring,
    Stopped,
    Starting,
    Running,
    Stopping,
    InstallationFailed,
    Deleting,
}

impl Status {
    /// True while the installation pipeline owns the instance.
    pub fn is_installing(self) -> bool {
        matches!(
            self,
            Self::Downloading | Self::RunningInstaller | Self::Configuring
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::PendingInstallation => "PENDING_INSTALLATION",
            Self::Downloading => "DOWNLOADING",
            Self::RunningInstaller => "RUNNING_INSTALLER",
            Self::Configuring => "CONFIGURING",
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::InstallationFailed => "INSTALLATION_FAILED",
            Self::Deleting => "DELETING",
        };
        f.write_str(text)
    }
}

/// A configured server deployment on the local host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    /// Filesystem root the server process runs in.
    pub root: PathBuf,
    pub jar_file_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub server_type: String,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub rcon_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rcon_password: Option<String>,
    #[serde(default)]
    pub rcon_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Java executable resolved during installation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_path: Option<PathBuf>,
    #[serde(default)]
    pub created_at: String,
}

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

impl Instance {
    /// A fresh record awaiting installation.
    pub fn new(name: &str, root: PathBuf, jar_file_name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            root,
            jar_file_name: jar_file_name.to_string(),
            version: String::new(),
            server_type: String::new(),
            ip: default_ip(),
            port: 25565,
            rcon_port: 0,
            rcon_password: None,
            rcon_enabled: false,
            pid: None,
            status: Status::PendingInstallation,
            status_message: None,
            allocated_memory: None,
            template_id: None,
            java_path: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Host used to reach the RCON listener. A wildcard bind means loopback.
    pub fn rcon_host(&self) -> &str {
        match self.ip.as_str() {
            "" | "0.0.0.0" | "::" => "127.0.0.1",
            ip => ip,
        }
    }

    pub fn is_rcon_configured(&self) -> bool {
        self.rcon_enabled
            && self.rcon_port > 0
            && self
                .rcon_password
                .as_deref()
                .map(|p| !p.is_empty())
                .unwrap_or(false)
    }
}

/// Live status snapshot served to viewers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub status_message: Option<String>,
    pub online: bool,
    pub players: Vec<String>,
    pub player_count: u32,
    pub max_players: u32,
    pub uptime: String,
    pub tps: f64,
    pub version: Option<String>,
    pub world_name: String,
    pub system: Option<crate::sysstats::SystemStats>,
}

/// Extended info assembled from several RCON queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedServerInfo {
    #[serde(flatten)]
    pub status: ServerStatus,
    pub seed: Option<String>,
    pub world_border: Option<String>,
    pub rcon: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rcon_requires_flag_port_and_password() {
        let mut instance = Instance::new("a", PathBuf::from("/tmp/a"), "server.jar");
        assert!(!instance.is_rcon_configured());
        instance.rcon_enabled = true;
        instance.rcon_port = 25700;
        instance.rcon_password = Some(String::new());
        assert!(!instance.is_rcon_configured());
        instance.rcon_password = Some("secret".to_string());
        assert!(instance.is_rcon_configured());
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&Status::InstallationFailed).unwrap();
        assert_eq!(json, "\"INSTALLATION_FAILED\"");
        assert_eq!(Status::RunningInstaller.to_string(), "RUNNING_INSTALLER");
    }

    #[test]
    fn wildcard_bind_uses_loopback_for_rcon() {
        let mut instance = Instance::new("a", PathBuf::from("/tmp/a"), "server.jar");
        assert_eq!(instance.rcon_host(), "127.0.0.1");
        instance.ip = "10.0.0.5".to_string();
        assert_eq!(instance.rcon_host(), "10.0.0.5");
    }
}
