//! Host CPU, memory and disk sampling.

use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;
use sysinfo::{Disks, System};

use crate::config::AlertSettings;
use crate::process::format_duration;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub cpu_usage: f64,
    pub cpu_cores: usize,
    /// Used memory in GiB.
    pub ram_usage: f64,
    pub total_ram: f64,
    pub ram_usage_percent: f64,
    /// Used space in GiB on the disk holding the data directory.
    pub disk_usage: f64,
    pub total_disk: f64,
    pub disk_usage_percent: f64,
    pub load_average: f64,
    pub system_uptime: String,
}

impl SystemStats {
    /// Names of the resources above their alert threshold.
    pub fn pressure(&self, alerts: &AlertSettings) -> Vec<&'static str> {
        let mut high = Vec::new();
        if self.cpu_usage > alerts.cpu {
            high.push("CPU");
        }
        if self.ram_usage_percent > alerts.memory {
            high.push("Memory");
        }
        if self.disk_usage_percent > alerts.disk {
            high.push("Disk");
        }
        high
    }
}

/// Keeps one `System` between samples; CPU usage is a delta over the
/// previous refresh, so the very first sample reads as zero.
pub struct SystemMonitor {
    system: Mutex<System>,
    disks: Mutex<Disks>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        }
    }

    pub fn sample(&self, data_dir: &Path) -> SystemStats {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu_usage = round2(system.global_cpu_usage() as f64);
        let cpu_cores = system.cpus().len();
        let total_memory = system.total_memory();
        let used_memory = system.used_memory();
        drop(system);

        let (disk_total, disk_available) = self.disk_space(data_dir);
        let disk_used = disk_total.saturating_sub(disk_available);
        let uptime = chrono::Duration::seconds(System::uptime() as i64);

        SystemStats {
            cpu_usage,
            cpu_cores,
            ram_usage: round2(used_memory as f64 / GIB),
            total_ram: round2(total_memory as f64 / GIB),
            ram_usage_percent: percent(used_memory, total_memory),
            disk_usage: round2(disk_used as f64 / GIB),
            total_disk: round2(disk_total as f64 / GIB),
            disk_usage_percent: percent(disk_used, disk_total),
            load_average: round2(System::load_average().one),
            system_uptime: format_duration(uptime),
        }
    }

    /// Total and available bytes of the mount with the longest prefix of `path`.
    fn disk_space(&self, path: &Path) -> (u64, u64) {
        let mut disks = self.disks.lock().unwrap_or_else(|e| e.into_inner());
        disks.refresh(true);
        disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .or_else(|| disks.list().first())
            .map(|d| (d.total_space(), d.available_space()))
            .unwrap_or((0, 0))
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(part as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(cpu: f64, mem: f64, disk: f64) -> SystemStats {
        SystemStats {
            cpu_usage: cpu,
            cpu_cores: 4,
            ram_usage: 1.0,
            total_ram: 2.0,
            ram_usage_percent: mem,
            disk_usage: 1.0,
            total_disk: 2.0,
            disk_usage_percent: disk,
            load_average: 0.5,
            system_uptime: "1m".to_string(),
        }
    }

    #[test]
    fn pressure_lists_resources_over_threshold() {
        let alerts = AlertSettings::default();
        assert!(stats(10.0, 10.0, 10.0).pressure(&alerts).is_empty());
        assert_eq!(
            stats(95.0, 90.0, 50.0).pressure(&alerts),
            vec!["CPU", "Memory"]
        );
        assert_eq!(stats(0.0, 0.0, 91.0).pressure(&alerts), vec!["Disk"]);
    }

    #[test]
    fn sample_reports_sane_values() {
        let monitor = SystemMonitor::new();
        let tmp = tempfile::tempdir().unwrap();
        let sample = monitor.sample(tmp.path());
        assert!(sample.cpu_cores > 0);
        assert!(sample.total_ram > 0.0);
        assert!((0.0..=100.0).contains(&sample.ram_usage_percent));
    }

    #[test]
    fn percent_handles_zero_total() {
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(1, 3), 33.33);
    }
}
