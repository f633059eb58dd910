//! Template step helpers and the process seam used by installation.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use super::first_boot::{run_first_boot, FirstBoot};
use crate::error::{AppError, Result};

/// Receives each output line of an installer process.
pub type LineSink<'a> = dyn Fn(&str) + Send + Sync + 'a;

/// Runs the external processes an installation needs.
#[async_trait::async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run `argv` inside `cwd` and return its exit code. Exceeding `timeout`
    /// kills the process and fails with a timeout error.
    async fn run_command(
        &self,
        argv: &[String],
        cwd: &Path,
        timeout: Duration,
        on_line: &LineSink<'_>,
    ) -> Result<i32>;

    /// Boot the freshly installed server once so it writes its baseline files.
    async fn first_boot(
        &self,
        java: &Path,
        jar: &str,
        cwd: &Path,
        timeout: Duration,
        on_line: &LineSink<'_>,
    ) -> Result<FirstBoot>;
}

/// Executes steps as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

#[async_trait::async_trait]
impl StepExecutor for ProcessExecutor {
    async fn run_command(
        &self,
        argv: &[String],
        cwd: &Path,
        timeout: Duration,
        on_line: &LineSink<'_>,
    ) -> Result<i32> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AppError::process("Installation command is empty"))?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::process(format!("Failed to run {}: {}", program, e)))?;

        let mut lines = merged_output(&mut child);
        let finished = tokio::time::timeout(timeout, async {
            while let Some(line) = lines.recv().await {
                log::info!("[Installer] {}", line);
                on_line(&line);
            }
            child.wait().await
        })
        .await;

        match finished {
            Ok(status) => {
                let status = status.map_err(|e| AppError::process(e.to_string()))?;
                Ok(status.code().unwrap_or(-1))
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill timed out installer {}: {}", program, e);
                }
                Err(AppError::timeout(format!(
                    "Installation command timed out after {} seconds",
                    timeout.as_secs()
                )))
            }
        }
    }

    async fn first_boot(
        &self,
        java: &Path,
        jar: &str,
        cwd: &Path,
        timeout: Duration,
        on_line: &LineSink<'_>,
    ) -> Result<FirstBoot> {
        run_first_boot(java, jar, cwd, timeout, on_line).await
    }
}

/// Funnel a child's stdout and stderr into one line stream. The stream ends
/// once both pipes close.
pub(super) fn merged_output(child: &mut Child) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        pump_lines(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        pump_lines(stderr, tx);
    }
    rx
}

fn pump_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

/// Fill the `{downloadUrl}`, `{jar}` and `{ram}` placeholders of a step command.
pub fn substitute(command: &str, download_url: &str, jar: &str, ram: &str) -> String {
    command
        .replace("{downloadUrl}", download_url)
        .replace("{jar}", jar)
        .replace("{ram}", ram)
}

/// Split a RUN command on single spaces, dropping empty pieces.
pub fn split_command(command: &str) -> Vec<String> {
    command
        .split(' ')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_ram_token(token: &str) -> bool {
    let digits = token.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return false;
    }
    let rest = &token[digits..];
    let rest = rest.strip_suffix('+').unwrap_or(rest);
    matches!(rest, "g" | "m" | "gb" | "mb")
}

/// Memory budget from a hardware requirement such as `"4GB RAM, 2 cores"`.
/// Only text mentioning RAM is considered; the first `<n>G`/`<n>M` token wins.
pub fn parse_ram(requirement: Option<&str>, default: &str) -> String {
    let Some(text) = requirement else {
        return default.to_string();
    };
    if !text.to_lowercase().contains("ram") {
        return default.to_string();
    }

    text.split_whitespace()
        .find(|part| is_ram_token(&part.to_lowercase()))
        .map(|part| {
            part.chars()
                .filter(|c| c.is_ascii_digit() || matches!(c, 'g' | 'G' | 'm' | 'M'))
                .collect::<String>()
                .to_uppercase()
        })
        .unwrap_or_else(|| default.to_string())
}
