//! Periodic jobs: telemetry broadcasts, health reconciliation and the
//! nightly maintenance and backup runs.
//!
//! Every job walks all instances and handles each one on its own; a failure
//! for one instance is logged and the loop moves on.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeDelta};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backup::{backup_world, cleanup_old_backups};
use crate::config::{AlertSettings, AppConfig, ScheduleSettings};
use crate::console::ConsoleMessage;
use crate::error::{AppError, Result};
use crate::hub::{BroadcastHub, Channel, EventKind};
use crate::instance::{Instance, InstanceStore};
use crate::process::{AdminCommand, Supervisor};
use crate::sysstats::{SystemMonitor, SystemStats};

/// Gap between `debug start` and `debug stop` when sampling TPS.
const TPS_WINDOW: Duration = Duration::from_secs(3);

const ITEM_CLEANUP: &str = "kill @e[type=minecraft:item]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Status,
    Stats,
    Players,
    Tps,
    Resources,
    Health,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DailyJob {
    Maintenance,
    Backup,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Telemetry<'a> {
    #[serde(flatten)]
    stats: &'a SystemStats,
    active_sessions: usize,
}

pub struct Scheduler {
    store: Arc<dyn InstanceStore>,
    supervisor: Arc<Supervisor>,
    hub: Arc<BroadcastHub>,
    system: Arc<SystemMonitor>,
    data_dir: PathBuf,
    schedule: ScheduleSettings,
    alerts: AlertSettings,
    retention_days: i64,
    last_stats: Mutex<Option<SystemStats>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        supervisor: Arc<Supervisor>,
        hub: Arc<BroadcastHub>,
        system: Arc<SystemMonitor>,
        data_dir: PathBuf,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            supervisor,
            hub,
            system,
            data_dir,
            schedule: config.schedule.clone(),
            alerts: config.alerts.clone(),
            retention_days: config.backup.retention_days,
            last_stats: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn every job. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            return;
        }

        let s = &self.schedule;
        for (job, secs) in [
            (Job::Status, s.status_secs),
            (Job::Stats, s.stats_secs),
            (Job::Players, s.players_secs),
            (Job::Tps, s.tps_secs),
            (Job::Resources, s.resources_secs),
            (Job::Health, s.health_secs),
        ] {
            tasks.push(self.spawn_periodic(job, Duration::from_secs(secs.max(1))));
        }
        tasks.push(self.spawn_daily(DailyJob::Maintenance, s.maintenance_hour));
        tasks.push(self.spawn_daily(DailyJob::Backup, s.backup_hour));
        log::info!("Scheduler started with {} jobs", tasks.len());
    }

    pub fn stop(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        log::info!("Scheduler stopped");
    }

    fn spawn_periodic(self: &Arc<Self>, job: Job, period: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                this.run(job).await;
            }
        })
    }

    fn spawn_daily(self: &Arc<Self>, job: DailyJob, hour: u32) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let now = Local::now().naive_local();
                let wait = (next_daily_run(now, hour) - now)
                    .to_std()
                    .unwrap_or(Duration::from_secs(60));
                log::debug!("{:?} scheduled in {}s", job, wait.as_secs());
                tokio::time::sleep(wait).await;
                match job {
                    DailyJob::Maintenance => this.daily_maintenance().await,
                    DailyJob::Backup => this.scheduled_backup().await,
                }
            }
        })
    }

    async fn run(&self, job: Job) {
        match job {
            Job::Status => self.broadcast_status().await,
            Job::Stats => self.broadcast_system_stats().await,
            Job::Players => self.refresh_player_lists().await,
            Job::Tps => self.sample_tps().await,
            Job::Resources => self.check_resources().await,
            Job::Health => self.health_check().await,
        }
    }

    fn instances(&self) -> Vec<Instance> {
        match self.store.list_all() {
            Ok(instances) => instances,
            Err(e) => {
                log::error!("Failed to list instances for scheduled job: {}", e);
                Vec::new()
            }
        }
    }

    async fn sample_system(&self) -> Result<SystemStats> {
        let system = Arc::clone(&self.system);
        let data_dir = self.data_dir.clone();
        let stats = tokio::task::spawn_blocking(move || system.sample(&data_dir))
            .await
            .map_err(|e| AppError::other(e.to_string()))?;
        *self.last_stats.lock().unwrap_or_else(|e| e.into_inner()) = Some(stats.clone());
        Ok(stats)
    }

    fn live(&self, instance: &Instance) -> bool {
        instance.is_rcon_configured() && self.supervisor.is_running(&instance.id)
    }

    pub async fn broadcast_status(&self) {
        if !self.hub.has_any_subscribers() {
            return;
        }
        let system = self
            .last_stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let updates = self.instances().into_iter().map(|instance| {
            let system = system.clone();
            async move {
                match self.supervisor.server_status(&instance.id, system).await {
                    Ok(status) => {
                        self.hub.publish(
                            &Channel::Instance(instance.id.clone()),
                            EventKind::Status,
                            &status,
                        );
                    }
                    Err(e) => log::error!(
                        "Error broadcasting server status update for instance {}: {}",
                        instance.id,
                        e
                    ),
                }
            }
        });
        join_all(updates).await;
    }

    pub async fn broadcast_system_stats(&self) {
        if !self.hub.has_any_subscribers() {
            return;
        }
        match self.sample_system().await {
            Ok(stats) => {
                let channel = Channel::AllInstances;
                let telemetry = Telemetry {
                    stats: &stats,
                    active_sessions: self.hub.active_session_count(&channel),
                };
                self.hub.publish(&channel, EventKind::SystemStats, &telemetry);
            }
            Err(e) => log::error!("Error broadcasting system stats update: {}", e),
        }
    }

    pub async fn refresh_player_lists(&self) {
        let refreshes = self
            .instances()
            .into_iter()
            .filter(|i| self.live(i))
            .map(|instance| async move {
                self.supervisor.refresh_player_list(&instance.id).await;
            });
        join_all(refreshes).await;
    }

    pub async fn sample_tps(&self) {
        let samples = self
            .instances()
            .into_iter()
            .filter(|i| self.live(i))
            .map(|instance| async move {
                self.supervisor.sample_tps(&instance.id, TPS_WINDOW).await;
            });
        join_all(samples).await;
    }

    pub async fn check_resources(&self) {
        let stats = match self.sample_system().await {
            Ok(stats) => stats,
            Err(e) => {
                log::error!("Error monitoring resource usage: {}", e);
                return;
            }
        };
        let high = stats.pressure(&self.alerts);
        if high.is_empty() {
            return;
        }

        let alert = resource_alert(&high);
        log::warn!("{}", alert);
        for instance in self.instances() {
            if self.hub.has_any_subscribers() {
                self.hub.publish_console(
                    &Channel::Instance(instance.id.clone()),
                    &ConsoleMessage::warning(format!("[SYSTEM] {}", alert)),
                );
            }
            if self.live(&instance) {
                self.say(&instance.id, "Server resources are running high. Please be patient.")
                    .await;
            }
        }
    }

    pub async fn health_check(&self) {
        for instance in self.instances() {
            if let Some(transition) = self.supervisor.reconcile(&instance.id).await {
                log::debug!("Instance {} transition: {:?}", instance.id, transition);
            }
        }
    }

    pub async fn daily_maintenance(&self) {
        for instance in self.instances() {
            log::info!("Starting daily maintenance tasks for instance {}...", instance.id);
            if self.live(&instance) {
                self.server_maintenance(&instance.id).await;
            }
            self.clean_old_backups(&instance).await;
            log::info!("Daily maintenance tasks completed for instance {}", instance.id);
        }
    }

    async fn server_maintenance(&self, id: &str) {
        log::info!("Performing server maintenance tasks for instance {}...", id);
        let steps = [
            AdminCommand::SaveAll.command_line(),
            ITEM_CLEANUP.to_string(),
            AdminCommand::Weather {
                kind: "clear".to_string(),
                duration: None,
            }
            .command_line(),
            AdminCommand::Time {
                value: "day".to_string(),
            }
            .command_line(),
        ];
        for command in steps {
            if !self.supervisor.send_command(id, &command).await {
                log::warn!("Maintenance command '{}' failed for instance {}", command, id);
            }
        }
    }

    async fn clean_old_backups(&self, instance: &Instance) {
        let root = instance.root.clone();
        let retention_days = self.retention_days;
        let report = tokio::task::spawn_blocking(move || cleanup_old_backups(&root, retention_days))
            .await
            .map_err(|e| AppError::backup(e.to_string()))
            .and_then(|r| r);

        match report {
            Ok(report) if report.deleted > 0 => {
                log::info!(
                    "Backup cleanup for instance {} completed: deleted {} old backup files, freed {:.2} MB",
                    instance.id,
                    report.deleted,
                    report.freed_mb()
                );
                self.hub.announce(
                    &instance.id,
                    ConsoleMessage::info(format!(
                        "[SYSTEM] Backup cleanup: deleted {} old files, freed {:.2} MB",
                        report.deleted,
                        report.freed_mb()
                    )),
                );
            }
            Ok(_) => log::info!(
                "Backup cleanup for instance {} completed: no old backup files found to delete",
                instance.id
            ),
            Err(e) => {
                log::error!("Error during backup cleanup for instance {}: {}", instance.id, e);
                self.hub.announce(
                    &instance.id,
                    ConsoleMessage::error(format!("[SYSTEM] Backup cleanup failed: {}", e.message())),
                );
            }
        }
    }

    pub async fn scheduled_backup(&self) {
        for instance in self.instances() {
            if !self.supervisor.is_running(&instance.id) {
                log::info!(
                    "Skipping scheduled backup for instance {} - server is offline",
                    instance.id
                );
                continue;
            }
            if !instance.is_rcon_configured() {
                continue;
            }

            log::info!("Starting scheduled world backup for instance {}...", instance.id);
            self.say(&instance.id, "Starting scheduled world backup...").await;

            let success = self
                .supervisor
                .execute_admin(&instance.id, &AdminCommand::SaveAll)
                .await
                && self.backup(&instance).await;

            let message = if success {
                "Scheduled world backup completed successfully"
            } else {
                "Scheduled world backup failed"
            };
            log::info!("{} for instance {}", message, instance.id);
            self.hub
                .announce(&instance.id, ConsoleMessage::info(format!("[SYSTEM] {}", message)));
            self.say(
                &instance.id,
                if success {
                    "Backup completed!"
                } else {
                    "Backup failed - contact admin"
                },
            )
            .await;
        }
    }

    async fn backup(&self, instance: &Instance) -> bool {
        let root = instance.root.clone();
        match tokio::task::spawn_blocking(move || backup_world(&root)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                log::error!("World backup failed for instance {}: {}", instance.id, e);
                false
            }
            Err(e) => {
                log::error!("World backup task for instance {} failed: {}", instance.id, e);
                false
            }
        }
    }

    async fn say(&self, id: &str, message: &str) {
        let command = AdminCommand::Say {
            message: message.to_string(),
        };
        if !self.supervisor.execute_admin(id, &command).await {
            log::debug!("Failed to broadcast in-game message to instance {}", id);
        }
    }
}

/// `"High resource usage detected: CPU Memory"` for the resources over their
/// threshold.
fn resource_alert(high: &[&str]) -> String {
    format!("High resource usage detected: {}", high.join(" "))
}

/// The next `hour:00` strictly after `now`.
fn next_daily_run(now: NaiveDateTime, hour: u32) -> NaiveDateTime {
    let today = now
        .date()
        .and_hms_opt(hour.min(23), 0, 0)
        .unwrap_or(now);
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}
