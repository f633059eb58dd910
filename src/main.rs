use std::sync::Arc;

use mcserver_manager::config::load_config;
use mcserver_manager::paths::ensure_data_dirs;
use mcserver_manager::{AppState, Result};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        log::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    ensure_data_dirs()?;
    let config = load_config()?;
    let state = Arc::new(AppState::new(&config)?);

    state.resume_monitoring().await;
    state.scheduler().start();
    log::info!("Server manager running, press Ctrl-C to exit");

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }

    log::info!("Shutting down, running servers are left in place");
    state.shutdown().await;
    Ok(())
}
