//! One-off boot of a new server so it generates its baseline files.
//!
//! The process is watched for the "Done (...)! For help" banner, at which
//! point `stop` is written to its stdin. The child is spawned with
//! `kill_on_drop`, so every early return also terminates it.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;
use tokio::time::Instant;

use super::steps::{merged_output, LineSink};
use crate::error::{AppError, Result};

const REAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of the first boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirstBoot {
    /// The server reported it finished starting.
    pub ready: bool,
    /// The overall timeout fired and the process was killed.
    pub timed_out: bool,
}

pub(super) fn is_ready_banner(line: &str) -> bool {
    line.contains("Done (") && line.contains("For help, type")
}

pub async fn run_first_boot(
    java: &Path,
    jar: &str,
    cwd: &Path,
    timeout: Duration,
    on_line: &LineSink<'_>,
) -> Result<FirstBoot> {
    let mut child = Command::new(java)
        .args(["-Xms512M", "-Xmx1G", "-jar", jar, "nogui"])
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::process(format!("Failed to launch {:?}: {}", java, e)))?;

    let mut stdin = child.stdin.take();
    let mut lines = merged_output(&mut child);
    let deadline = Instant::now() + timeout;
    let mut outcome = FirstBoot::default();

    loop {
        match tokio::time::timeout_at(deadline, lines.recv()).await {
            Ok(Some(line)) => {
                log::debug!("Server init output: {}", line);
                on_line(&format!("[Server Init] {}", line));
                if !outcome.ready && is_ready_banner(&line) {
                    outcome.ready = true;
                    on_line("Server loaded successfully, shutting down...");
                    if let Some(mut input) = stdin.take() {
                        if let Err(e) = input.write_all(b"stop\n").await {
                            log::warn!("Failed to send stop command to server: {}", e);
                        }
                        if let Err(e) = input.flush().await {
                            log::warn!("Failed to flush stop command: {}", e);
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(_) => {
                outcome.timed_out = true;
                break;
            }
        }
    }

    if !outcome.timed_out {
        match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => {
                let status = status.map_err(|e| AppError::process(e.to_string()))?;
                log::info!("First boot exited with {}", status);
            }
            Err(_) => outcome.timed_out = true,
        }
    }

    if outcome.timed_out {
        on_line("Server taking longer than expected, forcing shutdown...");
        if let Err(e) = child.start_kill() {
            log::warn!("Failed to kill first boot process: {}", e);
        }
        if tokio::time::timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
            log::warn!("First boot process did not exit after kill");
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn recognises_ready_banner() {
        assert!(is_ready_banner(
            "[12:00:00] [Server thread/INFO]: Done (4.512s)! For help, type \"help\""
        ));
        assert!(!is_ready_banner("[12:00:00] [Server thread/INFO]: Preparing spawn area: 84%"));
    }

    #[cfg(unix)]
    fn fake_java(dir: &Path, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt as _;

        let path = dir.join("fake-java");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sends_stop_after_banner() {
        let tmp = tempfile::tempdir().unwrap();
        let java = fake_java(
            tmp.path(),
            "echo 'Done (1.0s)! For help, type \"help\"'\nread cmd\necho \"got $cmd\"\ntouch server.properties",
        );
        let seen = Mutex::new(Vec::new());
        let sink = |line: &str| seen.lock().unwrap().push(line.to_string());

        let outcome = run_first_boot(&java, "server.jar", tmp.path(), Duration::from_secs(20), &sink)
            .await
            .unwrap();
        assert!(outcome.ready);
        assert!(!outcome.timed_out);
        assert!(seen
            .lock()
            .unwrap()
            .iter()
            .any(|l| l == "[Server Init] got stop"));
        assert!(tmp.path().join("server.properties").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_server_is_killed_at_deadline() {
        let tmp = tempfile::tempdir().unwrap();
        let java = fake_java(tmp.path(), "exec sleep 30");
        let outcome = run_first_boot(
            &java,
            "server.jar",
            tmp.path(),
            Duration::from_millis(500),
            &|_: &str| {},
        )
        .await
        .unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.ready);
    }
}
