use std::fs;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::paths::{config_path, ensure_data_dirs};

static CONFIG_CACHE: OnceLock<RwLock<Arc<AppConfig>>> = OnceLock::new();

fn load_config_from_disk() -> Result<AppConfig> {
    let path = config_path();
    if !path.exists() {
        let config = AppConfig::default();
        save_config_to_disk(&config)?;
        return Ok(config);
    }
    let content = fs::read_to_string(&path).map_err(|e| AppError::config(e.to_string()))?;
    toml::from_str(&content).map_err(|e| AppError::config(e.to_string()))
}

fn save_config_to_disk(config: &AppConfig) -> Result<()> {
    ensure_data_dirs()?;
    let content = toml::to_string_pretty(config).map_err(|e| AppError::config(e.to_string()))?;
    fs::write(config_path(), content).map_err(|e| AppError::config(e.to_string()))
}

fn get_config_cache() -> Result<&'static RwLock<Arc<AppConfig>>> {
    if let Some(cache) = CONFIG_CACHE.get() {
        return Ok(cache);
    }

    let config = load_config_from_disk()?;
    let _ = CONFIG_CACHE.set(RwLock::new(Arc::new(config)));

    CONFIG_CACHE
        .get()
        .ok_or_else(|| AppError::config("CONFIG_CACHE not initialized"))
}

pub fn load_config() -> Result<Arc<AppConfig>> {
    let cache = get_config_cache()?;
    let config = cache.read().unwrap_or_else(|e| e.into_inner());
    Ok(Arc::clone(&config))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub console: ConsoleSettings,
    pub rcon: RconSettings,
    pub ports: PortSettings,
    pub supervisor: SupervisorSettings,
    pub install: InstallSettings,
    pub schedule: ScheduleSettings,
    pub alerts: AlertSettings,
    pub backup: BackupSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSettings {
    /// Messages kept per instance before the oldest is evicted.
    pub history_capacity: usize,
    /// Existing log lines parsed when monitoring starts.
    pub seed_lines: usize,
    /// History entries replayed to a newly attached viewer.
    pub backfill: usize,
    /// Bounded wait for a log watcher to exit.
    pub stop_wait_secs: u64,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            seed_lines: 100,
            backfill: 50,
            stop_wait_secs: 5,
        }
    }
}

impl ConsoleSettings {
    pub fn stop_wait(&self) -> Duration {
        Duration::from_secs(self.stop_wait_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RconSettings {
    pub attempts: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RconSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay_ms: 1000,
            timeout_ms: 5000,
        }
    }
}

impl RconSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    pub game: PortRange,
    pub rcon: PortRange,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            game: PortRange {
                start: 25565,
                end: 25665,
            },
            rcon: PortRange {
                start: 25700,
                end: 25800,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Wait after the RCON `stop` before force killing.
    pub stop_grace_secs: u64,
    /// Java launcher used when the instance has no resolved runtime.
    pub java_command: String,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            stop_grace_secs: 5,
            java_command: "java".to_string(),
        }
    }
}

impl SupervisorSettings {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallSettings {
    pub step_timeout_secs: u64,
    pub first_boot_timeout_secs: u64,
    pub properties_wait_secs: u64,
    pub default_ram: String,
    pub java_probe_timeout_secs: u64,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            step_timeout_secs: 30,
            first_boot_timeout_secs: 180,
            properties_wait_secs: 10,
            default_ram: "2G".to_string(),
            java_probe_timeout_secs: 10,
        }
    }
}

impl InstallSettings {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn first_boot_timeout(&self) -> Duration {
        Duration::from_secs(self.first_boot_timeout_secs)
    }

    pub fn properties_wait(&self) -> Duration {
        Duration::from_secs(self.properties_wait_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub status_secs: u64,
    pub stats_secs: u64,
    pub players_secs: u64,
    pub tps_secs: u64,
    pub resources_secs: u64,
    pub health_secs: u64,
    /// Local hour of the daily maintenance run.
    pub maintenance_hour: u32,
    /// Local hour of the nightly world backup.
    pub backup_hour: u32,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            status_secs: 15,
            stats_secs: 5,
            players_secs: 30,
            tps_secs: 30,
            resources_secs: 30,
            health_secs: 120,
            maintenance_hour: 2,
            backup_hour: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            cpu: 80.0,
            memory: 85.0,
            disk: 90.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub retention_days: i64,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self { retention_days: 7 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: "mcserver-manager".to_string(),
            timeout_secs: 30,
        }
    }
}
