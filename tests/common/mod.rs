#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcserver_manager::config::{AppConfig, PortRange};
use mcserver_manager::download::Downloader;
use mcserver_manager::error::Result;
use mcserver_manager::install::{FirstBoot, JavaProvider, LineSink, StepExecutor};
use mcserver_manager::instance::{Instance, InstanceStore, MemoryInstanceStore};
use mcserver_manager::templates::{Template, TemplateCatalog};
use mcserver_manager::{AppState, Collaborators};

/// Records every URL and writes a placeholder file.
#[derive(Default)]
pub struct FakeDownloader {
    pub urls: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        self.urls.lock().unwrap().push(url.to_string());
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(dest, b"fake jar").unwrap();
        Ok(())
    }
}

/// RUN steps exit with `exit_code`; first boot lays out a fresh server.
pub struct FakeExecutor {
    pub exit_code: i32,
    pub commands: Mutex<Vec<Vec<String>>>,
    pub boots: AtomicUsize,
}

impl FakeExecutor {
    pub fn exiting_with(exit_code: i32) -> Self {
        Self {
            exit_code,
            commands: Mutex::new(Vec::new()),
            boots: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl StepExecutor for FakeExecutor {
    async fn run_command(
        &self,
        argv: &[String],
        _cwd: &Path,
        _timeout: Duration,
        on_line: &LineSink<'_>,
    ) -> Result<i32> {
        self.commands.lock().unwrap().push(argv.to_vec());
        on_line("installer output");
        Ok(self.exit_code)
    }

    async fn first_boot(
        &self,
        _java: &Path,
        _jar: &str,
        cwd: &Path,
        _timeout: Duration,
        on_line: &LineSink<'_>,
    ) -> Result<FirstBoot> {
        self.boots.fetch_add(1, Ordering::SeqCst);
        for dir in ["logs", "world", "world_nether", "world_the_end"] {
            fs::create_dir_all(cwd.join(dir)).unwrap();
        }
        fs::write(
            cwd.join("server.properties"),
            "#Minecraft server properties\nmotd=A Minecraft Server\nserver-port=25565\nenable-rcon=false\n",
        )
        .unwrap();
        on_line("[Server Init] Done (1.0s)! For help, type \"help\"");
        Ok(FirstBoot {
            ready: true,
            timed_out: false,
        })
    }
}

/// System Java always satisfies the requirement.
pub struct SystemJava;

#[async_trait::async_trait]
impl JavaProvider for SystemJava {
    async fn ensure_java(
        &self,
        requirement: Option<&str>,
        progress: &LineSink<'_>,
    ) -> Result<Option<PathBuf>> {
        progress(&format!("Java requirement: {}", requirement.unwrap_or("any")));
        Ok(None)
    }
}

pub fn template() -> Template {
    serde_json::from_value(serde_json::json!({
        "id": "vanilla",
        "name": "Vanilla",
        "systemRequirements": "Java 21+",
        "hardwareRequirements": "4GB RAM, 2 cores",
        "downloadUrl": "https://example.org/files/server-1.21.jar",
        "type": "Vanilla",
        "installationSteps": [
            { "type": "DOWNLOAD", "command": "{downloadUrl}" },
            { "type": "RUN", "command": "java -Xmx{ram} -jar {jar} --initSettings" }
        ]
    }))
    .unwrap()
}

/// Config with fast timeouts and port ranges away from real servers.
pub fn test_config(base_port: u16) -> AppConfig {
    let mut config = AppConfig::default();
    config.install.properties_wait_secs = 0;
    config.install.step_timeout_secs = 5;
    config.supervisor.stop_grace_secs = 1;
    config.console.stop_wait_secs = 1;
    config.rcon.attempts = 1;
    config.rcon.retry_delay_ms = 10;
    config.rcon.timeout_ms = 300;
    config.ports.game = PortRange {
        start: base_port,
        end: base_port + 49,
    };
    config.ports.rcon = PortRange {
        start: base_port + 50,
        end: base_port + 99,
    };
    config
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryInstanceStore>,
    pub downloader: Arc<FakeDownloader>,
    pub executor: Arc<FakeExecutor>,
    pub dir: tempfile::TempDir,
}

pub fn harness(config: &AppConfig, exit_code: i32) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryInstanceStore::new());
    let downloader = Arc::new(FakeDownloader::default());
    let executor = Arc::new(FakeExecutor::exiting_with(exit_code));

    let parts = Collaborators {
        store: Arc::clone(&store) as Arc<dyn InstanceStore>,
        templates: TemplateCatalog::new(vec![template()]),
        downloader: Arc::clone(&downloader) as Arc<dyn Downloader>,
        executor: Arc::clone(&executor) as Arc<dyn StepExecutor>,
        java: Arc::new(SystemJava),
        data_dir: dir.path().to_path_buf(),
    };
    let state = Arc::new(AppState::with_collaborators(config, parts).unwrap());

    Harness {
        state,
        store,
        downloader,
        executor,
        dir,
    }
}

impl Harness {
    /// A pending instance rooted inside the harness directory.
    pub fn pending_instance(&self, name: &str) -> Instance {
        let template = template();
        let mut instance = Instance::new(
            name,
            self.dir.path().join("servers").join(name),
            &template.jar_file_name(),
        );
        instance.template_id = Some(template.id);
        self.store.save(&instance).unwrap();
        instance
    }
}
