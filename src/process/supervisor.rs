//! Start, stop and observe server processes.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::commands::AdminCommand;
use super::control::{force_kill, is_process_alive, terminate, wait_for_exit};
use super::responses::ResponseParser;
use super::runtime::{format_uptime, RuntimeRegistry};
use crate::config::SupervisorSettings;
use crate::console::{ConsoleMessage, LogMonitor};
use crate::error::{AppError, Result};
use crate::hub::BroadcastHub;
use crate::instance::{DetailedServerInfo, Instance, InstanceStore, ServerStatus, Status};
use crate::paths::latest_log_path;
use crate::properties::ServerProperties;
use crate::rcon::RconClient;
use crate::sysstats::SystemStats;

/// How long a fresh process gets to create its log file before tailing
/// gives up.
const LOG_APPEAR_TIMEOUT: Duration = Duration::from_secs(30);

/// Edge seen by one reconciliation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Crashed,
}

pub struct Supervisor {
    store: Arc<dyn InstanceStore>,
    rcon: Arc<RconClient>,
    runtime: Arc<RuntimeRegistry>,
    hub: Arc<BroadcastHub>,
    monitor: Arc<LogMonitor>,
    settings: SupervisorSettings,
    responses: ResponseParser,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        rcon: Arc<RconClient>,
        runtime: Arc<RuntimeRegistry>,
        hub: Arc<BroadcastHub>,
        monitor: Arc<LogMonitor>,
        settings: SupervisorSettings,
    ) -> Result<Self> {
        Ok(Self {
            store,
            rcon,
            runtime,
            hub,
            monitor,
            settings,
            responses: ResponseParser::new()?,
            locks: DashMap::new(),
        })
    }

    pub fn runtime(&self) -> &Arc<RuntimeRegistry> {
        &self.runtime
    }

    /// One lifecycle operation per instance at a time.
    pub async fn lock_instance(&self, instance_id: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            &self
                .locks
                .entry(instance_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        lock.lock_owned().await
    }

    fn try_lock_instance(&self, instance_id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = Arc::clone(
            &self
                .locks
                .entry(instance_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        lock.try_lock_owned().ok()
    }

    pub fn forget(&self, instance_id: &str) {
        self.runtime.remove(instance_id);
        self.locks.remove(instance_id);
    }

    /// Liveness from the stored PID, checked against the OS on every call.
    /// A PID whose process is gone is cleared from the record.
    pub fn is_running(&self, instance_id: &str) -> bool {
        let Ok(instance) = self.store.get(instance_id) else {
            return false;
        };
        let Some(pid) = instance.pid else {
            return false;
        };
        if is_process_alive(pid) {
            return true;
        }

        log::info!(
            "Instance {} PID {} is no longer alive, clearing",
            instance_id,
            pid
        );
        let cleared = self.store.update(instance_id, &mut |i| {
            if i.pid == Some(pid) {
                i.pid = None;
                if matches!(i.status, Status::Running | Status::Starting | Status::Stopping) {
                    i.status = Status::Stopped;
                    i.status_message = Some("Server process exited".to_string());
                }
            }
        });
        if let Err(e) = cleared {
            log::warn!("Failed to clear stale PID for instance {}: {}", instance_id, e);
        }
        false
    }

    pub async fn start(&self, instance_id: &str) -> bool {
        let _guard = self.lock_instance(instance_id).await;
        self.start_locked(instance_id).await
    }

    pub async fn stop(&self, instance_id: &str) -> bool {
        let _guard = self.lock_instance(instance_id).await;
        self.stop_locked(instance_id).await
    }

    /// Stop, then start only if the stop succeeded. The instance stays
    /// locked across both halves.
    pub async fn restart(&self, instance_id: &str) -> bool {
        let _guard = self.lock_instance(instance_id).await;
        if !self.stop_locked(instance_id).await {
            return false;
        }
        self.start_locked(instance_id).await
    }

    async fn start_locked(&self, instance_id: &str) -> bool {
        match self.launch(instance_id).await {
            Ok(pid) => {
                log::info!("Instance {} started (pid: {})", instance_id, pid);
                self.hub
                    .announce(instance_id, ConsoleMessage::info("[SYSTEM] Server process launched"));
                true
            }
            Err(e) => {
                log::error!("Failed to start instance {}: {}", instance_id, e);
                self.hub.announce(
                    instance_id,
                    ConsoleMessage::error(format!("[ERROR] Failed to start server: {}", e.message())),
                );
                false
            }
        }
    }

    async fn launch(&self, instance_id: &str) -> Result<u32> {
        let instance = self.store.get(instance_id)?;
        if instance.status.is_installing()
            || matches!(
                instance.status,
                Status::PendingInstallation | Status::InstallationFailed | Status::Deleting
            )
        {
            return Err(AppError::other(format!(
                "Instance is not ready to start ({})",
                instance.status
            )));
        }
        if let Some(pid) = instance.pid.filter(|pid| is_process_alive(*pid)) {
            log::info!("Instance {} already running (pid: {})", instance_id, pid);
            return Ok(pid);
        }

        let jar = instance.root.join(&instance.jar_file_name);
        if !jar.exists() {
            return Err(AppError::io(format!("Server jar not found: {}", jar.display())));
        }

        let mut cmd = self.server_command(&instance);
        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::process(format!("Failed to launch server: {}", e)))?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::process("Failed to get process ID"))?;

        self.store.update(instance_id, &mut |i| {
            i.pid = Some(pid);
            i.status = Status::Running;
            i.status_message = Some("Server started".to_string());
        })?;
        self.runtime.mark_started(instance_id);

        if let Some(stdout) = child.stdout.take() {
            let tag = instance_id.to_string();
            let mut lines = BufReader::new(stdout).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("[{} stdout] {}", tag, line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let tag = instance_id.to_string();
            let mut lines = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    log::warn!("[{} stderr] {}", tag, line);
                }
            });
        }

        let tag = instance_id.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => log::info!("Instance {} process exited: {}", tag, status),
                Err(e) => log::warn!("Failed waiting on instance {}: {}", tag, e),
            }
        });

        self.spawn_log_follow(instance_id, &instance);
        Ok(pid)
    }

    fn server_command(&self, instance: &Instance) -> Command {
        let java = instance
            .java_path
            .as_ref()
            .map(|p| p.as_os_str().to_os_string())
            .unwrap_or_else(|| self.settings.java_command.clone().into());

        let mut cmd = Command::new(java);
        if let Some(memory) = instance.allocated_memory.as_deref() {
            cmd.arg(format!("-Xmx{}", memory));
        }
        cmd.arg("-jar")
            .arg(&instance.jar_file_name)
            .arg("nogui")
            .current_dir(&instance.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }
        cmd
    }

    /// Begin tailing once the server has created its log.
    fn spawn_log_follow(&self, instance_id: &str, instance: &Instance) {
        let monitor = Arc::clone(&self.monitor);
        let id = instance_id.to_string();
        let root = instance.root.clone();
        tokio::spawn(async move {
            let log_path = latest_log_path(&root);
            let deadline = tokio::time::Instant::now() + LOG_APPEAR_TIMEOUT;
            while !log_path.exists() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            let started =
                tokio::task::spawn_blocking(move || monitor.start_monitoring(&id, &root)).await;
            match started {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => log::warn!("No log file appeared for {:?}", log_path),
                Ok(Err(e)) => log::warn!("Failed to tail {:?}: {}", log_path, e),
                Err(e) => log::error!("Log follow task failed: {}", e),
            }
        });
    }

    async fn stop_locked(&self, instance_id: &str) -> bool {
        self.runtime.set_stopping(instance_id, true);
        let result = self.halt(instance_id).await;
        self.runtime.set_stopping(instance_id, false);

        match result {
            Ok(()) => {
                self.hub
                    .announce(instance_id, ConsoleMessage::info("[SYSTEM] Server stopped"));
                true
            }
            Err(e) => {
                log::error!("Failed to stop instance {}: {}", instance_id, e);
                self.hub.announce(
                    instance_id,
                    ConsoleMessage::error(format!("[ERROR] Failed to stop server: {}", e.message())),
                );
                false
            }
        }
    }

    async fn halt(&self, instance_id: &str) -> Result<()> {
        let instance = self.store.get(instance_id)?;
        let grace = self.settings.stop_grace();

        if let Some(pid) = instance.pid.filter(|pid| is_process_alive(*pid)) {
            let asked = instance.is_rcon_configured()
                && self.query(instance_id, "stop").await.is_some();

            if asked {
                log::info!("Sent graceful stop via RCON to instance {}", instance_id);
                if !wait_for_exit(pid, grace).await {
                    log::warn!(
                        "Instance {} still running after {}s, terminating",
                        instance_id,
                        grace.as_secs()
                    );
                    force_kill(pid)?;
                }
            } else {
                terminate(pid, grace).await?;
            }
        }

        self.store.update(instance_id, &mut |i| {
            i.pid = None;
            if matches!(i.status, Status::Running | Status::Starting | Status::Stopping) {
                i.status = Status::Stopped;
                i.status_message = Some("Server stopped".to_string());
            }
        })?;
        self.runtime.clear_transient(instance_id);
        self.runtime.update(instance_id, |s| s.last_online = Some(false));

        let monitor = Arc::clone(&self.monitor);
        let id = instance_id.to_string();
        if let Err(e) = tokio::task::spawn_blocking(move || monitor.stop_monitoring(&id)).await {
            log::warn!("Failed to stop log monitoring for {}: {}", instance_id, e);
        }
        Ok(())
    }

    /// Run a command through RCON on its own task and return the response.
    pub async fn query(&self, instance_id: &str, command: &str) -> Option<String> {
        match self.rcon.execute_async(instance_id, command).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("RCON task for instance {} failed: {}", instance_id, e);
                None
            }
        }
    }

    /// Requires a live process; otherwise fails without touching the network.
    pub async fn send_command(&self, instance_id: &str, command: &str) -> bool {
        if !self.is_running(instance_id) {
            log::warn!(
                "Cannot send command - instance {} is not running",
                instance_id
            );
            return false;
        }
        if !self.rcon.is_configured(instance_id) {
            log::debug!("RCON not configured for instance {}", instance_id);
            return false;
        }

        match self.query(instance_id, command).await {
            Some(response) => {
                log::info!(
                    "Command '{}' on instance {} succeeded: {}",
                    command,
                    instance_id,
                    response.trim()
                );
                true
            }
            None => false,
        }
    }

    pub async fn execute_admin(&self, instance_id: &str, command: &AdminCommand) -> bool {
        self.send_command(instance_id, &command.command_line()).await
    }

    pub async fn refresh_player_list(&self, instance_id: &str) {
        let Some(response) = self.query(instance_id, "list").await else {
            return;
        };
        if let Some(list) = self.responses.player_list(&response) {
            log::debug!(
                "Instance {}: {} of {} players online",
                instance_id,
                list.online,
                list.max
            );
            self.runtime.update(instance_id, |s| {
                s.player_count = list.online;
                s.online_players = list.players.into_iter().collect();
            });
        }
    }

    /// Cache version and seed once, refresh players and TPS every call.
    pub async fn refresh_server_info(&self, instance_id: &str) {
        if !self.is_running(instance_id) || !self.rcon.is_configured(instance_id) {
            return;
        }

        self.refresh_player_list(instance_id).await;

        let state = self.runtime.snapshot(instance_id);
        if state.version.is_none() {
            if let Some(version) = self
                .query(instance_id, "version")
                .await
                .and_then(|r| self.responses.version(&r))
            {
                log::info!("Instance {} runs {}", instance_id, version);
                self.runtime.update(instance_id, |s| s.version = Some(version));
            }
        }
        if state.seed.is_none() {
            if let Some(seed) = self
                .query(instance_id, "seed")
                .await
                .and_then(|r| self.responses.seed(&r))
            {
                self.runtime.update(instance_id, |s| s.seed = Some(seed));
            }
        }
        if !state.tps_sampling {
            if let Some(tps) = self
                .query(instance_id, "tps")
                .await
                .and_then(|r| self.responses.tps(&r))
            {
                self.runtime.update(instance_id, |s| s.tps = Some(tps));
            }
        }
    }

    /// `debug start`, a pause, then `debug stop`. Skipped while another
    /// sample for the instance is in flight.
    pub async fn sample_tps(&self, instance_id: &str, window: Duration) {
        if !self.runtime.begin_tps_sample(instance_id) {
            return;
        }
        let started = self.query(instance_id, "debug start").await;
        if started
            .as_deref()
            .map(|r| r.contains("Started debug profiling"))
            .unwrap_or(false)
        {
            tokio::time::sleep(window).await;
            if self.query(instance_id, "debug stop").await.is_some() {
                log::debug!("TPS sample completed for instance {}", instance_id);
            }
        }
        self.runtime.end_tps_sample(instance_id);
    }

    pub async fn server_status(
        &self,
        instance_id: &str,
        system: Option<SystemStats>,
    ) -> Result<ServerStatus> {
        let online = self.is_running(instance_id);
        if online {
            self.refresh_server_info(instance_id).await;
        }

        let instance = self.store.get(instance_id)?;
        let props = ServerProperties::for_root(&instance.root);
        let max_players = u32::try_from(props.get_int("max-players", 20)).unwrap_or(20);
        let state = self.runtime.snapshot(instance_id);

        let level = props
            .get("level-name")
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "world".to_string());
        let world_name = if online && instance.root.join(&level).is_dir() {
            level
        } else {
            "Unknown".to_string()
        };

        Ok(ServerStatus {
            id: instance.id,
            name: instance.name,
            status: instance.status,
            status_message: instance.status_message,
            online,
            players: if online {
                state.online_players.iter().cloned().collect()
            } else {
                Vec::new()
            },
            player_count: if online { state.player_count } else { 0 },
            max_players,
            uptime: format_uptime(online, state.started_at),
            tps: if online { state.tps.unwrap_or(20.0) } else { 0.0 },
            version: if online { state.version } else { None },
            world_name,
            system,
        })
    }

    pub async fn detailed_info(
        &self,
        instance_id: &str,
        system: Option<SystemStats>,
    ) -> Result<DetailedServerInfo> {
        let status = self.server_status(instance_id, system).await?;
        let world_border = if status.online && self.rcon.is_configured(instance_id) {
            self.query(instance_id, "worldborder get").await
        } else {
            None
        };
        let seed = if status.online {
            self.runtime.snapshot(instance_id).seed
        } else {
            None
        };

        Ok(DetailedServerInfo {
            status,
            seed,
            world_border,
            rcon: self.rcon.connection_info(instance_id),
        })
    }

    /// Compare liveness with the previous tick and react to edges. Skipped
    /// while a lifecycle operation holds the instance.
    pub async fn reconcile(&self, instance_id: &str) -> Option<Transition> {
        let _guard = self.try_lock_instance(instance_id)?;

        let online = self.is_running(instance_id);
        let (previous, stopping) = self.runtime.update(instance_id, |s| {
            (s.last_online.replace(online), s.stopping)
        });

        let transition = match (previous.unwrap_or(false), online) {
            (true, false) if !stopping => Some(Transition::Crashed),
            (false, true) => Some(Transition::Started),
            _ => None,
        };

        match transition {
            Some(Transition::Crashed) => {
                log::warn!(
                    "Instance {} appears to have stopped unexpectedly",
                    instance_id
                );
                self.runtime.clear_transient(instance_id);
                self.hub.announce(
                    instance_id,
                    ConsoleMessage::error("[SYSTEM] Server appears to have stopped unexpectedly"),
                );
            }
            Some(Transition::Started) => {
                log::info!("Instance {} has started", instance_id);
                self.hub
                    .announce(instance_id, ConsoleMessage::info("[SYSTEM] Server has started"));
                self.refresh_server_info(instance_id).await;
            }
            None => {}
        }

        if online && self.rcon.is_configured(instance_id) && !self.rcon.test_connection(instance_id).await {
            log::warn!(
                "RCON connection test failed for instance {} - server may not be responding",
                instance_id
            );
            self.hub.announce(
                instance_id,
                ConsoleMessage::warning("[SYSTEM] RCON connection lost - some features may not work"),
            );
        }

        transition
    }
}
