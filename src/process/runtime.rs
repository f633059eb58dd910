//! In-memory bookkeeping for live instances. Nothing here is persisted.

use std::collections::BTreeSet;

use chrono::{DateTime, Local};
use dashmap::DashMap;

#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    pub started_at: Option<DateTime<Local>>,
    pub online_players: BTreeSet<String>,
    pub player_count: u32,
    pub version: Option<String>,
    pub seed: Option<String>,
    pub tps: Option<f64>,
    /// Liveness seen by the previous reconciliation tick.
    pub last_online: Option<bool>,
    /// Set for the duration of an operator-requested stop.
    pub stopping: bool,
    pub tps_sampling: bool,
}

#[derive(Default)]
pub struct RuntimeRegistry {
    states: DashMap<String, RuntimeState>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, instance_id: &str) -> RuntimeState {
        self.states
            .get(instance_id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn update<R>(&self, instance_id: &str, f: impl FnOnce(&mut RuntimeState) -> R) -> R {
        let mut state = self.states.entry(instance_id.to_string()).or_default();
        f(&mut state)
    }

    /// Fresh uptime and an empty player set for a just-launched process.
    pub fn mark_started(&self, instance_id: &str) {
        self.update(instance_id, |s| {
            s.started_at = Some(Local::now());
            s.online_players.clear();
            s.player_count = 0;
            s.tps = None;
        });
    }

    pub fn clear_transient(&self, instance_id: &str) {
        self.update(instance_id, |s| {
            s.started_at = None;
            s.online_players.clear();
            s.player_count = 0;
            s.tps = None;
        });
    }

    pub fn set_stopping(&self, instance_id: &str, stopping: bool) {
        self.update(instance_id, |s| s.stopping = stopping);
    }

    /// Claim the TPS sampler. `false` when a sample is already running.
    pub fn begin_tps_sample(&self, instance_id: &str) -> bool {
        self.update(instance_id, |s| !std::mem::replace(&mut s.tps_sampling, true))
    }

    pub fn end_tps_sample(&self, instance_id: &str) {
        self.update(instance_id, |s| s.tps_sampling = false);
    }

    pub fn remove(&self, instance_id: &str) {
        self.states.remove(instance_id);
    }
}

/// `Xd Yh Zm`, `Yh Zm` or `Zm`.
pub fn format_duration(duration: chrono::Duration) -> String {
    let days = duration.num_days();
    let hours = duration.num_hours() % 24;
    let minutes = duration.num_minutes() % 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes.max(0))
    }
}

pub fn format_uptime(online: bool, started_at: Option<DateTime<Local>>) -> String {
    if !online {
        return "Offline".to_string();
    }
    match started_at {
        Some(start) => format_duration(Local::now() - start),
        None => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn durations_drop_leading_zero_units() {
        assert_eq!(format_duration(Duration::seconds(59)), "0m");
        assert_eq!(format_duration(Duration::minutes(61)), "1h 1m");
        assert_eq!(
            format_duration(Duration::days(2) + Duration::hours(3) + Duration::minutes(4)),
            "2d 3h 4m"
        );
    }

    #[test]
    fn uptime_reports_offline_and_unknown() {
        assert_eq!(format_uptime(false, Some(Local::now())), "Offline");
        assert_eq!(format_uptime(true, None), "Unknown");
        let started = Local::now() - Duration::minutes(5);
        assert_eq!(format_uptime(true, Some(started)), "5m");
    }

    #[test]
    fn tps_sampler_is_exclusive() {
        let registry = RuntimeRegistry::new();
        assert!(registry.begin_tps_sample("a"));
        assert!(!registry.begin_tps_sample("a"));
        assert!(registry.begin_tps_sample("b"));
        registry.end_tps_sample("a");
        assert!(registry.begin_tps_sample("a"));
    }

    #[test]
    fn clear_keeps_cached_server_info() {
        let registry = RuntimeRegistry::new();
        registry.mark_started("a");
        registry.update("a", |s| {
            s.version = Some("Paper 1.20.4".to_string());
            s.online_players.insert("Steve".to_string());
            s.player_count = 1;
        });
        registry.clear_transient("a");

        let state = registry.snapshot("a");
        assert!(state.started_at.is_none());
        assert!(state.online_players.is_empty());
        assert_eq!(state.player_count, 0);
        assert_eq!(state.version.as_deref(), Some("Paper 1.20.4"));
    }
}
