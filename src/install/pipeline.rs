use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::java::JavaProvider;
use super::steps::{parse_ram, split_command, substitute, StepExecutor};
use crate::config::InstallSettings;
use crate::console::ConsoleMessage;
use crate::download::Downloader;
use crate::error::{AppError, Result};
use crate::hub::{BroadcastHub, Channel};
use crate::instance::{set_status, Instance, InstanceStore, Status};
use crate::paths::eula_path;
use crate::ports::{PortAllocator, PortKind};
use crate::properties::ServerProperties;
use crate::templates::{StepKind, Template};

const EXPECTED_FILES: [&str; 2] = ["server.properties", "eula.txt"];
const EXPECTED_DIRS: [&str; 4] = ["logs", "world", "world_nether", "world_the_end"];

/// Drives an instance from `PENDING_INSTALLATION` to `STOPPED`.
///
/// Every stage persists its status before doing work, so an interrupted run
/// leaves a record saying how far it got. Any error ends the run in
/// `INSTALLATION_FAILED`; re-installing starts over from the top.
pub struct Installer {
    store: Arc<dyn InstanceStore>,
    allocator: Arc<PortAllocator>,
    hub: Arc<BroadcastHub>,
    downloader: Arc<dyn Downloader>,
    executor: Arc<dyn StepExecutor>,
    java: Arc<dyn JavaProvider>,
    settings: InstallSettings,
    java_command: String,
}

impl Installer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn InstanceStore>,
        allocator: Arc<PortAllocator>,
        hub: Arc<BroadcastHub>,
        downloader: Arc<dyn Downloader>,
        executor: Arc<dyn StepExecutor>,
        java: Arc<dyn JavaProvider>,
        settings: InstallSettings,
        java_command: &str,
    ) -> Self {
        Self {
            store,
            allocator,
            hub,
            downloader,
            executor,
            java,
            settings,
            java_command: java_command.to_string(),
        }
    }

    /// Run the whole pipeline. The caller holds the instance's lifecycle lock.
    pub async fn install(&self, instance_id: &str, template: &Template) -> Result<()> {
        let instance = self.store.get(instance_id)?;
        log::info!(
            "Starting installation of {} ({}) from template {}",
            instance.name,
            instance_id,
            template.id
        );
        self.progress(
            instance_id,
            ConsoleMessage::info(format!("Installation started for {}", instance.name)),
        );

        match self.run(instance, template).await {
            Ok(()) => {
                self.update_status(
                    instance_id,
                    Status::Stopped,
                    "Installation completed successfully!",
                )?;
                self.progress(
                    instance_id,
                    ConsoleMessage::info(
                        "Server installation completed successfully! Your server is ready to start.",
                    ),
                );
                Ok(())
            }
            Err(e) => {
                let message = format!("Installation failed: {}", e.message());
                log::error!("Installation failed for instance {}: {}", instance_id, e);
                if let Err(persist) =
                    self.update_status(instance_id, Status::InstallationFailed, &message)
                {
                    log::error!(
                        "Failed to record installation failure for {}: {}",
                        instance_id,
                        persist
                    );
                }
                self.progress(instance_id, ConsoleMessage::error(message));
                Err(e)
            }
        }
    }

    async fn run(&self, instance: Instance, template: &Template) -> Result<()> {
        let id = instance.id.clone();
        self.update_status(&id, Status::Downloading, "Starting installation...")?;

        let java = {
            let sink = self.sink(&id);
            self.java
                .ensure_java(template.system_requirements.as_deref(), &sink)
                .await?
        };
        if let Some(path) = &java {
            let path = path.clone();
            self.store
                .update(&id, &mut |i| i.java_path = Some(path.clone()))?;
        }

        fs::create_dir_all(&instance.root).map_err(|e| AppError::io(e.to_string()))?;
        self.progress(
            &id,
            ConsoleMessage::info(format!(
                "Created server directory: {}",
                instance.root.display()
            )),
        );
        fs::write(eula_path(&instance.root), "eula=true").map_err(|e| AppError::io(e.to_string()))?;
        self.progress(&id, ConsoleMessage::info("EULA accepted"));

        let ram = parse_ram(
            template.hardware_requirements.as_deref(),
            &self.settings.default_ram,
        );
        self.run_steps(&instance, template, &ram).await?;

        let java = java.unwrap_or_else(|| PathBuf::from(&self.java_command));
        self.generate_server_files(&instance, &java).await?;

        self.configure(&id, &instance.root, &ram).await
    }

    async fn run_steps(&self, instance: &Instance, template: &Template, ram: &str) -> Result<()> {
        let id = instance.id.as_str();
        self.update_status(id, Status::Downloading, "Downloading server files...")?;

        for step in &template.installation_steps {
            let command = substitute(
                &step.command,
                &template.download_url,
                &instance.jar_file_name,
                ram,
            );

            match step.kind {
                StepKind::Download => {
                    let url = if command.trim().is_empty() {
                        template.download_url.as_str()
                    } else {
                        command.trim()
                    };
                    self.progress(id, ConsoleMessage::info("Downloading server files..."));
                    self.downloader
                        .download(url, &instance.root.join(&instance.jar_file_name))
                        .await?;
                    self.progress(id, ConsoleMessage::info("Download completed"));
                }
                StepKind::Run => {
                    self.update_status(
                        id,
                        Status::RunningInstaller,
                        &format!("Running installation command: {}", command),
                    )?;
                    self.progress(id, ConsoleMessage::info(format!("Executing: {}", command)));

                    let argv = split_command(&command);
                    let sink = self.sink(id);
                    let code = self
                        .executor
                        .run_command(&argv, &instance.root, self.settings.step_timeout(), &sink)
                        .await?;
                    if code != 0 {
                        return Err(AppError::process(format!(
                            "Installation command failed with exit code: {}",
                            code
                        )));
                    }
                    self.progress(id, ConsoleMessage::info("Command executed successfully"));
                }
                StepKind::Unknown => {
                    log::warn!("Unknown installation step type in template {}", template.id);
                    self.progress(
                        id,
                        ConsoleMessage::warning("Unknown installation step type, skipped"),
                    );
                }
            }
        }
        Ok(())
    }

    async fn generate_server_files(&self, instance: &Instance, java: &Path) -> Result<()> {
        let id = instance.id.as_str();
        self.update_status(id, Status::Configuring, "Generating baseline server files...")?;
        self.progress(
            id,
            ConsoleMessage::info("Running server for the first time to generate baseline files..."),
        );

        let sink = self.sink(id);
        let outcome = self
            .executor
            .first_boot(
                java,
                &instance.jar_file_name,
                &instance.root,
                self.settings.first_boot_timeout(),
                &sink,
            )
            .await
            .map_err(|e| {
                AppError::process(format!("Failed to generate server files: {}", e.message()))
            })?;

        if !outcome.ready {
            log::warn!(
                "First boot of {} ended without a ready banner (timed out: {})",
                id,
                outcome.timed_out
            );
        }
        verify_generated_files(&instance.root);
        self.progress(id, ConsoleMessage::info("Server files generated successfully"));
        Ok(())
    }

    async fn configure(&self, id: &str, root: &Path, ram: &str) -> Result<()> {
        self.update_status(id, Status::Configuring, "Configuring server settings...")?;

        let (game_port, rcon_port, password) = {
            let _allocation = self.allocator.lock().await;
            let game_port = self.allocator.allocate(PortKind::Game)?;
            let rcon_port = self.allocator.allocate(PortKind::Rcon)?;
            let password: String = uuid::Uuid::new_v4().simple().to_string()[..16].to_string();
            let ram = ram.to_string();
            let secret = password.clone();
            self.store.update(id, &mut |i| {
                i.port = game_port;
                i.rcon_port = rcon_port;
                i.rcon_password = Some(secret.clone());
                i.rcon_enabled = true;
                i.ip = "0.0.0.0".to_string();
                i.allocated_memory = Some(ram.clone());
            })?;
            (game_port, rcon_port, password)
        };

        self.configure_properties(root, game_port, rcon_port, &password)
            .await?;

        self.progress(
            id,
            ConsoleMessage::info(format!(
                "Server configured - Game Port: {}, RCON Port: {}",
                game_port, rcon_port
            )),
        );
        log::info!(
            "Server configured for instance {}: game port {}, RCON port {}",
            id,
            game_port,
            rcon_port
        );
        Ok(())
    }

    async fn configure_properties(
        &self,
        root: &Path,
        game_port: u16,
        rcon_port: u16,
        password: &str,
    ) -> Result<()> {
        let properties = ServerProperties::for_root(root);

        let deadline = tokio::time::Instant::now() + self.settings.properties_wait();
        while !properties.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
        if !properties.exists() {
            properties.write_defaults()?;
            log::info!("Created default server.properties in {:?}", root);
        }

        properties
            .update(&[
                ("server-port", game_port.to_string()),
                ("enable-rcon", "true".to_string()),
                ("rcon.port", rcon_port.to_string()),
                ("rcon.password", password.to_string()),
            ])
            .map_err(|e| {
                AppError::config(format!("Failed to configure server properties: {}", e.message()))
            })
    }

    fn update_status(&self, id: &str, status: Status, message: &str) -> Result<()> {
        set_status(self.store.as_ref(), id, status, message)?;
        log::info!("Updated status for instance {}: {} - {}", id, status, message);
        Ok(())
    }

    /// Installation output goes to the instance's viewers and to the
    /// installation channel.
    fn progress(&self, id: &str, message: ConsoleMessage) {
        self.hub.publish_console(&Channel::Installation, &message);
        self.hub.announce(id, message);
    }

    fn sink(&self, id: &str) -> impl Fn(&str) + Send + Sync + '_ {
        let id = id.to_string();
        move |line: &str| self.progress(&id, ConsoleMessage::info(line))
    }
}

fn verify_generated_files(root: &Path) {
    for name in EXPECTED_FILES {
        let path = root.join(name);
        if path.is_file() {
            log::debug!("Verified file exists: {:?}", path);
        } else {
            log::warn!("Expected file not found: {:?}", path);
        }
    }
    for name in EXPECTED_DIRS {
        let path = root.join(name);
        if path.is_dir() {
            log::debug!("Verified directory exists: {:?}", path);
        } else {
            log::warn!("Expected directory not found: {:?}", path);
        }
    }
}
