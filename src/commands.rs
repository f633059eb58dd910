//! Operations exposed to the web layer.
//!
//! [`AppState`] wires every subsystem together once at startup and is then
//! shared behind an `Arc`. Lifecycle calls that viewers only see as
//! success/failure return `bool`; everything else returns [`Result`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::backup::{self, BackupInfo};
use crate::config::AppConfig;
use crate::console::{ConsoleHistory, ConsoleMessage, LogMonitor, LogParser};
use crate::download::{Downloader, HttpDownloader};
use crate::error::{AppError, Result};
use crate::hub::{BroadcastHub, Channel, EventKind, InboundEvent, SessionId, Subscriber};
use crate::install::{Installer, JavaManager, JavaProvider, ProcessExecutor, StepExecutor};
use crate::instance::{
    self, DetailedServerInfo, Instance, InstanceStore, ServerStatus, Status, TomlInstanceStore,
};
use crate::paths::{get_data_dir, get_java_dir, instances_path, templates_path};
use crate::ports::PortAllocator;
use crate::process::{AdminCommand, RuntimeRegistry, Supervisor};
use crate::properties::{
    lookup_player_uuid, requires_restart, ServerProperties, Whitelist, WhitelistEntry, NIL_UUID,
};
use crate::rcon::RconClient;
use crate::scheduler::Scheduler;
use crate::sysstats::{SystemMonitor, SystemStats};
use crate::templates::{Template, TemplateCatalog};
use crate::validation::validate_instance_id;

/// The pieces [`AppState`] talks to the outside world through.
pub struct Collaborators {
    pub store: Arc<dyn InstanceStore>,
    pub templates: TemplateCatalog,
    pub downloader: Arc<dyn Downloader>,
    pub executor: Arc<dyn StepExecutor>,
    pub java: Arc<dyn JavaProvider>,
    pub data_dir: PathBuf,
}

impl Collaborators {
    /// Real stores and processes under the data directory.
    pub fn from_disk(config: &AppConfig) -> Result<Self> {
        let downloader = Arc::new(HttpDownloader::new(&config.http)?);
        let java = JavaManager::new(
            Arc::clone(&downloader) as Arc<dyn Downloader>,
            get_java_dir(),
            &config.supervisor.java_command,
            Duration::from_secs(config.install.java_probe_timeout_secs),
        );
        Ok(Self {
            store: Arc::new(TomlInstanceStore::open(&instances_path())?),
            templates: TemplateCatalog::load(&templates_path())?,
            downloader,
            executor: Arc::new(ProcessExecutor),
            java: Arc::new(java),
            data_dir: get_data_dir(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertiesUpdate {
    pub message: String,
    pub requires_restart: bool,
    pub updated_count: usize,
}

pub struct AppState {
    store: Arc<dyn InstanceStore>,
    templates: TemplateCatalog,
    history: Arc<ConsoleHistory>,
    hub: Arc<BroadcastHub>,
    monitor: Arc<LogMonitor>,
    supervisor: Arc<Supervisor>,
    installer: Arc<Installer>,
    system: Arc<SystemMonitor>,
    scheduler: Arc<Scheduler>,
    client: Client,
    data_dir: PathBuf,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Self::with_collaborators(config, Collaborators::from_disk(config)?)
    }

    pub fn with_collaborators(config: &AppConfig, parts: Collaborators) -> Result<Self> {
        let store = parts.store;
        let history = Arc::new(ConsoleHistory::new(config.console.history_capacity));
        let hub = Arc::new(BroadcastHub::new(
            Arc::clone(&history),
            config.console.backfill,
        ));
        let monitor = Arc::new(LogMonitor::new(
            Arc::new(LogParser::new()?),
            Arc::clone(&history),
            Arc::clone(&hub),
            config.console.clone(),
        ));
        let rcon = Arc::new(RconClient::new(Arc::clone(&store), config.rcon.clone()));
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&store),
            rcon,
            Arc::new(RuntimeRegistry::new()),
            Arc::clone(&hub),
            Arc::clone(&monitor),
            config.supervisor.clone(),
        )?);
        let allocator = Arc::new(PortAllocator::new(config.ports.clone(), Arc::clone(&store)));
        let installer = Arc::new(Installer::new(
            Arc::clone(&store),
            allocator,
            Arc::clone(&hub),
            parts.downloader,
            parts.executor,
            parts.java,
            config.install.clone(),
            &config.supervisor.java_command,
        ));
        let system = Arc::new(SystemMonitor::new());
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&supervisor),
            Arc::clone(&hub),
            Arc::clone(&system),
            parts.data_dir.clone(),
            config,
        ));
        let client = Client::builder()
            .user_agent(config.http.user_agent.clone())
            .timeout(Duration::from_secs(config.http.timeout_secs))
            .build()?;

        Ok(Self {
            store,
            templates: parts.templates,
            history,
            hub,
            monitor,
            supervisor,
            installer,
            system,
            scheduler,
            client,
            data_dir: parts.data_dir,
        })
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn is_monitoring(&self, instance_id: &str) -> bool {
        self.monitor.is_monitoring(instance_id)
    }

    /// Resume log tailing for servers that outlived a previous daemon run.
    pub async fn resume_monitoring(&self) {
        for instance in self.list_instances().unwrap_or_default() {
            if !self.supervisor.is_running(&instance.id) {
                continue;
            }
            let monitor = Arc::clone(&self.monitor);
            let (id, root) = (instance.id.clone(), instance.root.clone());
            match tokio::task::spawn_blocking(move || monitor.start_monitoring(&id, &root)).await {
                Ok(Ok(_)) => log::info!("Resumed log monitoring for instance {}", instance.id),
                Ok(Err(e)) => log::warn!("Failed to resume monitoring {}: {}", instance.id, e),
                Err(e) => log::error!("Monitor task for {} failed: {}", instance.id, e),
            }
        }
    }

    /// Stop background work. Running servers are left alone.
    pub async fn shutdown(&self) {
        self.scheduler.stop();
        let monitor = Arc::clone(&self.monitor);
        if let Err(e) = tokio::task::spawn_blocking(move || monitor.stop_all()).await {
            log::error!("Log monitor shutdown task failed: {}", e);
        }
    }

    // Instances

    pub fn list_templates(&self) -> &[Template] {
        self.templates.list_templates()
    }

    pub fn list_instances(&self) -> Result<Vec<Instance>> {
        self.store.list_all()
    }

    pub fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        validate_instance_id(instance_id)?;
        self.store.get(instance_id)
    }

    pub fn create_instance(&self, name: &str, template_id: &str) -> Result<Instance> {
        let template = self.templates.get(template_id)?;
        instance::create_instance(self.store.as_ref(), name.trim(), template)
    }

    /// Run the installation pipeline to completion.
    pub async fn install_instance(&self, instance_id: &str) -> Result<()> {
        let instance = self.get_instance(instance_id)?;
        let _guard = self.supervisor.lock_instance(instance_id).await;

        if self.supervisor.is_running(instance_id) {
            return Err(AppError::instance_running());
        }
        if instance.status.is_installing() || instance.status == Status::Deleting {
            return Err(AppError::other(format!(
                "Instance is busy ({})",
                instance.status
            )));
        }
        let template_id = instance
            .template_id
            .as_deref()
            .ok_or_else(|| AppError::template("Instance has no template"))?;
        let template = self.templates.get(template_id)?;

        self.installer.install(instance_id, template).await
    }

    /// Install on a background task; progress arrives on the installation
    /// channel and the instance's console.
    pub fn spawn_install(self: &Arc<Self>, instance_id: &str) -> JoinHandle<Result<()>> {
        let this = Arc::clone(self);
        let id = instance_id.to_string();
        tokio::spawn(async move { this.install_instance(&id).await })
    }

    pub async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        self.get_instance(instance_id)?;
        if self.supervisor.is_running(instance_id) && !self.supervisor.stop(instance_id).await {
            return Err(AppError::process("Failed to stop server before deletion"));
        }

        let guard = self.supervisor.lock_instance(instance_id).await;
        instance::set_status(self.store.as_ref(), instance_id, Status::Deleting, "Deleting instance")?;

        let monitor = Arc::clone(&self.monitor);
        let id = instance_id.to_string();
        if let Err(e) = tokio::task::spawn_blocking(move || monitor.stop_monitoring(&id)).await {
            log::warn!("Failed to stop log monitoring for {}: {}", instance_id, e);
        }

        let store = Arc::clone(&self.store);
        let id = instance_id.to_string();
        tokio::task::spawn_blocking(move || instance::remove_instance(store.as_ref(), &id))
            .await
            .map_err(|e| AppError::io(e.to_string()))??;

        self.hub
            .close_channel(&Channel::Instance(instance_id.to_string()));
        self.history.clear(instance_id);
        drop(guard);
        self.supervisor.forget(instance_id);
        log::info!("Deleted instance {}", instance_id);
        Ok(())
    }

    // Lifecycle

    pub async fn start_instance(&self, instance_id: &str) -> bool {
        validate_instance_id(instance_id).is_ok() && self.supervisor.start(instance_id).await
    }

    pub async fn stop_instance(&self, instance_id: &str) -> bool {
        validate_instance_id(instance_id).is_ok() && self.supervisor.stop(instance_id).await
    }

    pub async fn restart_instance(&self, instance_id: &str) -> bool {
        validate_instance_id(instance_id).is_ok() && self.supervisor.restart(instance_id).await
    }

    // Status

    async fn system_stats(&self) -> Option<SystemStats> {
        let system = Arc::clone(&self.system);
        let data_dir = self.data_dir.clone();
        tokio::task::spawn_blocking(move || system.sample(&data_dir))
            .await
            .map_err(|e| log::warn!("System sampling failed: {}", e))
            .ok()
    }

    pub async fn server_status(&self, instance_id: &str) -> Result<ServerStatus> {
        validate_instance_id(instance_id)?;
        let system = self.system_stats().await;
        self.supervisor.server_status(instance_id, system).await
    }

    pub async fn detailed_info(&self, instance_id: &str) -> Result<DetailedServerInfo> {
        validate_instance_id(instance_id)?;
        let system = self.system_stats().await;
        self.supervisor.detailed_info(instance_id, system).await
    }

    pub fn console_history(&self, instance_id: &str, limit: Option<usize>) -> Vec<ConsoleMessage> {
        match limit {
            Some(limit) => self.history.recent(instance_id, limit),
            None => self.history.all(instance_id),
        }
    }

    pub fn clear_console_history(&self, instance_id: &str) {
        self.history.clear(instance_id);
        self.hub
            .announce(instance_id, ConsoleMessage::info("[ADMIN] Console history cleared"));
    }

    // Commands

    /// Echo the command to viewers, then run it.
    pub async fn send_command(&self, instance_id: &str, command: &str) -> bool {
        let command = command.trim();
        if command.is_empty() {
            return false;
        }
        log::info!("Executing command for instance {}: {}", instance_id, command);
        self.hub
            .announce(instance_id, ConsoleMessage::command(format!("> {}", command)));

        let sent = self.supervisor.send_command(instance_id, command).await;
        if !sent {
            self.hub.announce(
                instance_id,
                ConsoleMessage::info(format!("Failed to execute command: {}", command)),
            );
        }
        sent
    }

    pub async fn execute_admin(&self, instance_id: &str, command: &AdminCommand) -> bool {
        self.send_command(instance_id, &command.command_line()).await
    }

    /// Dispatch one message a viewer sent on its stream.
    pub async fn handle_inbound(&self, instance_id: &str, event: InboundEvent, conn: &dyn Subscriber) {
        match event {
            InboundEvent::Command { message } => {
                self.send_command(instance_id, &message).await;
            }
            InboundEvent::RequestStatus => match self.server_status(instance_id).await {
                Ok(status) => {
                    if let Err(e) = self.hub.send_to(conn, EventKind::Status, &status) {
                        log::debug!("Failed to send status to viewer of {}: {}", instance_id, e);
                    }
                }
                Err(e) => log::error!("Error getting status for instance {}: {}", instance_id, e),
            },
            InboundEvent::RequestHistory => {
                let recent = self.history.recent(instance_id, self.history.capacity());
                if let Err(e) = self.hub.send_to(conn, EventKind::History, &recent) {
                    log::debug!("Failed to send history to viewer of {}: {}", instance_id, e);
                }
            }
        }
    }

    pub fn subscribe(&self, channel: Channel, conn: Arc<dyn Subscriber>) -> SessionId {
        self.hub.subscribe(channel, conn)
    }

    pub fn unsubscribe(&self, channel: &Channel, session: SessionId) -> bool {
        self.hub.unsubscribe(channel, session)
    }

    // Properties and whitelist

    pub fn get_properties(&self, instance_id: &str) -> Result<BTreeMap<String, String>> {
        let instance = self.get_instance(instance_id)?;
        ServerProperties::for_root(&instance.root).read()
    }

    /// Write the given keys, then `reload` a running server.
    pub async fn update_properties(
        &self,
        instance_id: &str,
        updates: &BTreeMap<String, String>,
    ) -> Result<PropertiesUpdate> {
        let instance = self.get_instance(instance_id)?;
        let restart = updates.keys().any(|k| requires_restart(k));
        log::info!(
            "Updating {} server properties for instance {}",
            updates.len(),
            instance_id
        );
        self.hub.announce(
            instance_id,
            ConsoleMessage::info(format!("[ADMIN] Updating {} server properties", updates.len())),
        );

        let pairs: Vec<(&str, String)> = updates
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        ServerProperties::for_root(&instance.root).update(&pairs)?;

        let mut message = "Properties updated successfully".to_string();
        if restart {
            message.push_str(" (server restart required)");
        }
        if self.supervisor.is_running(instance_id) {
            self.supervisor
                .execute_admin(instance_id, &AdminCommand::Reload)
                .await;
            self.hub
                .announce(instance_id, ConsoleMessage::info(format!("[SYSTEM] {}", message)));
        }

        Ok(PropertiesUpdate {
            message,
            requires_restart: restart,
            updated_count: updates.len(),
        })
    }

    pub fn get_whitelist(&self, instance_id: &str) -> Result<Vec<WhitelistEntry>> {
        let instance = self.get_instance(instance_id)?;
        Whitelist::for_root(&instance.root).list()
    }

    /// `false` when the player is already listed.
    pub async fn add_to_whitelist(&self, instance_id: &str, player: &str) -> Result<bool> {
        let instance = self.get_instance(instance_id)?;
        let whitelist = Whitelist::for_root(&instance.root);
        self.hub.announce(
            instance_id,
            ConsoleMessage::info(format!("[ADMIN] Adding {} to whitelist", player)),
        );
        if whitelist.contains(player)? {
            return Ok(false);
        }

        let uuid = lookup_player_uuid(&self.client, player)
            .await
            .unwrap_or_else(|| NIL_UUID.to_string());
        let added = whitelist.add(player, &uuid)?;
        if added {
            self.reload_whitelist(instance_id).await;
        }
        Ok(added)
    }

    pub async fn remove_from_whitelist(&self, instance_id: &str, player: &str) -> Result<bool> {
        let instance = self.get_instance(instance_id)?;
        self.hub.announce(
            instance_id,
            ConsoleMessage::info(format!("[ADMIN] Removing {} from whitelist", player)),
        );
        let removed = Whitelist::for_root(&instance.root).remove(player)?;
        if removed {
            self.reload_whitelist(instance_id).await;
        }
        Ok(removed)
    }

    async fn reload_whitelist(&self, instance_id: &str) {
        if self.supervisor.is_running(instance_id) {
            self.supervisor
                .execute_admin(instance_id, &AdminCommand::WhitelistReload)
                .await;
        }
    }

    // Backups

    pub async fn backup_world(&self, instance_id: &str) -> Result<PathBuf> {
        let instance = self.get_instance(instance_id)?;
        self.hub
            .announce(instance_id, ConsoleMessage::info("[ADMIN] Creating world backup..."));
        if self.supervisor.is_running(instance_id) {
            self.supervisor
                .execute_admin(instance_id, &AdminCommand::SaveAll)
                .await;
        }

        let root = instance.root.clone();
        let result = tokio::task::spawn_blocking(move || backup::backup_world(&root))
            .await
            .map_err(|e| AppError::backup(e.to_string()))
            .and_then(|r| r);

        match &result {
            Ok(_) => self.hub.announce(
                instance_id,
                ConsoleMessage::info("[SYSTEM] World backup created successfully"),
            ),
            Err(e) => {
                log::error!("Backup failed for instance {}: {}", instance_id, e);
                self.hub.announce(
                    instance_id,
                    ConsoleMessage::error("[ERROR] Failed to create world backup"),
                );
            }
        }
        result
    }

    pub fn list_backups(&self, instance_id: &str) -> Result<Vec<BackupInfo>> {
        let instance = self.get_instance(instance_id)?;
        backup::list_backups(&instance.root)
    }

    pub fn delete_backup(&self, instance_id: &str, backup_name: &str) -> Result<()> {
        let instance = self.get_instance(instance_id)?;
        backup::delete_backup(&instance.root, backup_name)
    }
}
