//! Platform-specific process control.

use std::time::{Duration, Instant};

use crate::error::{AppError, Result};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Check if a process is alive by PID.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Check if a process is alive by PID.
#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// Ask a process to shut down.
#[cfg(unix)]
pub fn graceful_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| AppError::process(format!("Failed to send SIGTERM to PID {}: {}", pid, e)))
}

#[cfg(not(unix))]
pub fn graceful_signal(pid: u32) -> Result<()> {
    run_taskkill(pid, false)
}

#[cfg(unix)]
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let target = Pid::from_raw(pid as i32);
    match getpgid(Some(target)) {
        Ok(pgid) => killpg(pgid, Signal::SIGKILL).map_err(|e| {
            AppError::process(format!(
                "Failed to kill process group {} (from pid {}): {}",
                pgid.as_raw(),
                pid,
                e
            ))
        }),
        Err(e) => kill(target, Signal::SIGKILL).map_err(|kill_err| {
            AppError::process(format!(
                "Failed to kill process {} (getpgid failed: {}): {}",
                pid, e, kill_err
            ))
        }),
    }
}

#[cfg(not(unix))]
pub fn force_kill(pid: u32) -> Result<()> {
    run_taskkill(pid, true)
}

#[cfg(not(unix))]
fn run_taskkill(pid: u32, force: bool) -> Result<()> {
    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
    if force {
        args.push("/F");
    }
    let output = std::process::Command::new("taskkill")
        .args(&args)
        .output()
        .map_err(|e| AppError::process(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.trim();
    Err(AppError::process(format!(
        "taskkill failed for pid {}: {}",
        pid,
        if detail.is_empty() { "(no output)" } else { detail }
    )))
}

/// Poll until the process is gone or the timeout passes. Returns whether it
/// exited.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return true;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
    !is_process_alive(pid)
}

/// Signal, wait up to `grace`, then kill whatever is left.
pub async fn terminate(pid: u32, grace: Duration) -> Result<()> {
    if !is_process_alive(pid) {
        return Ok(());
    }

    if let Err(e) = graceful_signal(pid) {
        log::warn!("Graceful signal failed for PID {pid}: {e}, will force kill immediately");
    } else if wait_for_exit(pid, grace).await {
        return Ok(());
    }

    if is_process_alive(pid) {
        log::warn!(
            "PID {pid} did not exit within {}s, force killing",
            grace.as_secs()
        );
        force_kill(pid)?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminate_stops_a_sleeping_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        assert!(is_process_alive(pid));

        let reaper = tokio::spawn(async move { child.wait().await });
        terminate(pid, Duration::from_secs(2)).await.unwrap();
        let _ = reaper.await;
        assert!(!is_process_alive(pid));
    }

    #[tokio::test]
    async fn wait_for_exit_times_out_on_live_process() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        assert!(!wait_for_exit(pid, Duration::from_millis(300)).await);
        force_kill(pid).unwrap();
        let _ = child.wait().await;
    }
}
