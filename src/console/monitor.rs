//! Tails `logs/latest.log` for each running instance.

use std::fs::{self, File};
use std::io::{BufRead as _, BufReader, Read as _, Seek as _, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use notify::event::EventKind;
use notify::{RecursiveMode, Watcher as _};

use super::history::ConsoleHistory;
use super::parser::LogParser;
use crate::config::ConsoleSettings;
use crate::error::{AppError, Result};
use crate::hub::{BroadcastHub, Channel};
use crate::paths::latest_log_path;

/// Wake-up interval of a watcher thread between filesystem events.
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Bytes read from the end of an existing log to seed history.
const SEED_WINDOW: u64 = 256 * 1024;

struct Watch {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct LogMonitor {
    parser: Arc<LogParser>,
    history: Arc<ConsoleHistory>,
    hub: Arc<BroadcastHub>,
    settings: ConsoleSettings,
    watches: DashMap<String, Watch>,
}

impl LogMonitor {
    pub fn new(
        parser: Arc<LogParser>,
        history: Arc<ConsoleHistory>,
        hub: Arc<BroadcastHub>,
        settings: ConsoleSettings,
    ) -> Self {
        Self {
            parser,
            history,
            hub,
            settings,
            watches: DashMap::new(),
        }
    }

    pub fn is_monitoring(&self, instance_id: &str) -> bool {
        self.watches
            .get(instance_id)
            .map(|w| !w.thread.is_finished())
            .unwrap_or(false)
    }

    /// Start tailing an instance's log. Returns `false` when there is no log
    /// file yet; the file is never created here.
    pub fn start_monitoring(&self, instance_id: &str, root: &Path) -> Result<bool> {
        if self.is_monitoring(instance_id) {
            return Ok(true);
        }

        let path = latest_log_path(root);
        if !path.exists() {
            log::warn!(
                "Log file {:?} for instance {} does not exist, not monitoring",
                path,
                instance_id
            );
            return Ok(false);
        }

        let sink = LineSink {
            instance_id: instance_id.to_string(),
            parser: Arc::clone(&self.parser),
            history: Arc::clone(&self.history),
            hub: Arc::clone(&self.hub),
        };

        // A restart re-attaches to the same log; lines already seen stay put.
        let offset = fs::metadata(&path)?.len();
        if self.history.len(instance_id) == 0 {
            for line in read_tail_lines(&path, offset, self.settings.seed_lines)? {
                sink.ingest(&line, false);
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let tail = Tail {
            path,
            offset,
            sink,
            stop: Arc::clone(&stop),
        };
        let thread = std::thread::Builder::new()
            .name(format!("log-tail-{}", instance_id))
            .spawn(move || tail.run())
            .map_err(|e| AppError::io(format!("Failed to spawn log watcher: {}", e)))?;

        if let Some(previous) = self.watches.insert(instance_id.to_string(), Watch { stop, thread }) {
            previous.stop.store(true, Ordering::Relaxed);
        }
        log::info!("Started log monitoring for instance {}", instance_id);
        Ok(true)
    }

    /// Signal the watcher and wait a bounded time for it to exit.
    pub fn stop_monitoring(&self, instance_id: &str) {
        let Some((_, watch)) = self.watches.remove(instance_id) else {
            return;
        };
        watch.stop.store(true, Ordering::Relaxed);

        let deadline = Instant::now() + self.settings.stop_wait();
        while !watch.thread.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }

        if watch.thread.is_finished() {
            if watch.thread.join().is_err() {
                log::error!("Log watcher for instance {} panicked", instance_id);
            }
            log::info!("Stopped log monitoring for instance {}", instance_id);
        } else {
            // Detached; it observes the flag on its next wake-up.
            log::warn!(
                "Log watcher for instance {} did not exit within {}s, detaching",
                instance_id,
                self.settings.stop_wait_secs
            );
        }
    }

    pub fn stop_all(&self) {
        let ids: Vec<String> = self.watches.iter().map(|w| w.key().clone()).collect();
        for id in ids {
            self.stop_monitoring(&id);
        }
    }
}

struct LineSink {
    instance_id: String,
    parser: Arc<LogParser>,
    history: Arc<ConsoleHistory>,
    hub: Arc<BroadcastHub>,
}

impl LineSink {
    fn ingest(&self, line: &str, broadcast: bool) {
        let Some(message) = self.parser.parse_line(line) else {
            return;
        };
        if broadcast && self.hub.has_any_subscribers() {
            self.hub
                .publish_console(&Channel::Instance(self.instance_id.clone()), &message);
        }
        self.history.push(&self.instance_id, message);
    }
}

struct Tail {
    path: PathBuf,
    offset: u64,
    sink: LineSink,
    stop: Arc<AtomicBool>,
}

impl Tail {
    fn run(mut self) {
        let Some(dir) = self.path.parent().map(Path::to_path_buf) else {
            return;
        };

        let (tx, rx) = mpsc::channel();
        let mut watcher = match notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        }) {
            Ok(watcher) => watcher,
            Err(e) => {
                log::error!("Failed to create log watcher for {:?}: {}", self.path, e);
                return;
            }
        };
        if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            log::error!("Failed to watch {:?}: {}", dir, e);
            return;
        }

        while !self.stop.load(Ordering::Relaxed) {
            match rx.recv_timeout(WATCH_POLL_INTERVAL) {
                Ok(Ok(event)) => {
                    if self.concerns_log(&event) {
                        self.read_appended();
                    }
                }
                Ok(Err(e)) => log::warn!("Log watch error for {:?}: {}", self.path, e),
                // Catch appends whose events were coalesced or missed.
                Err(RecvTimeoutError::Timeout) => self.read_appended(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        drop(watcher);
        log::debug!("Log watcher for {:?} exited", self.path);
    }

    fn concerns_log(&self, event: &notify::Event) -> bool {
        matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == self.path.file_name())
    }

    fn read_appended(&mut self) {
        if let Err(e) = self.try_read_appended() {
            log::debug!("Failed to read {:?}: {}", self.path, e);
        }
    }

    /// Read complete lines past the stored offset. A trailing partial line
    /// stays unread until its newline arrives.
    fn try_read_appended(&mut self) -> Result<()> {
        let len = fs::metadata(&self.path)?.len();
        if len < self.offset {
            log::info!("Log {:?} was replaced, reading from start", self.path);
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 || buf.last() != Some(&b'\n') {
                break;
            }
            self.offset += n as u64;
            let line = String::from_utf8_lossy(&buf);
            self.sink.ingest(line.trim_end_matches(['\r', '\n']), true);
        }
        Ok(())
    }
}

/// Up to `count` complete lines ending at byte `end`.
fn read_tail_lines(path: &Path, end: u64, count: usize) -> Result<Vec<String>> {
    if count == 0 || end == 0 {
        return Ok(Vec::new());
    }

    let start = end.saturating_sub(SEED_WINDOW);
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut bytes = Vec::new();
    file.take(end - start).read_to_end(&mut bytes)?;

    let text = String::from_utf8_lossy(&bytes);
    let mut lines: Vec<&str> = text.lines().collect();
    if start > 0 && !lines.is_empty() {
        // First line is probably cut.
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(count);
    Ok(lines.into_iter().skip(skip).map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;
    use crate::console::MessageType;
    use crate::hub::ChannelSubscriber;

    fn monitor(history: &Arc<ConsoleHistory>, hub: &Arc<BroadcastHub>) -> LogMonitor {
        LogMonitor::new(
            Arc::new(LogParser::new().unwrap()),
            Arc::clone(history),
            Arc::clone(hub),
            ConsoleSettings {
                stop_wait_secs: 2,
                ..ConsoleSettings::default()
            },
        )
    }

    #[test]
    fn missing_log_is_not_created() {
        let tmp = tempfile::tempdir().unwrap();
        let history = Arc::new(ConsoleHistory::new(10));
        let hub = Arc::new(BroadcastHub::new(Arc::clone(&history), 5));
        let monitor = monitor(&history, &hub);

        assert!(!monitor.start_monitoring("a", tmp.path()).unwrap());
        assert!(!latest_log_path(tmp.path()).exists());
        assert!(!monitor.is_monitoring("a"));
    }

    #[test]
    fn restarting_on_same_log_does_not_reseed() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = latest_log_path(tmp.path());
        fs::create_dir_all(log_path.parent().unwrap()).unwrap();
        fs::write(
            &log_path,
            "[10:00:00] [Server thread/INFO]: Starting minecraft server\n\
             [10:00:01] [Server thread/INFO]: Preparing level \"world\"\n",
        )
        .unwrap();

        let history = Arc::new(ConsoleHistory::new(100));
        let hub = Arc::new(BroadcastHub::new(Arc::clone(&history), 5));
        let monitor = monitor(&history, &hub);

        assert!(monitor.start_monitoring("a", tmp.path()).unwrap());
        assert_eq!(history.len("a"), 2);
        monitor.stop_monitoring("a");
        assert!(!monitor.is_monitoring("a"));

        assert!(monitor.start_monitoring("a", tmp.path()).unwrap());
        assert_eq!(history.len("a"), 2);
        monitor.stop_monitoring("a");
    }

    #[test]
    fn tail_lines_skip_cut_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("x.log");
        fs::write(&path, "one\ntwo\nthree\n").unwrap();
        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(read_tail_lines(&path, len, 2).unwrap(), vec!["two", "three"]);
        assert_eq!(read_tail_lines(&path, len, 10).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn seeds_history_then_streams_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = latest_log_path(tmp.path());
        fs::create_dir_all(log_path.parent().unwrap()).unwrap();
        fs::write(
            &log_path,
            "[10:00:00] [Server thread/INFO]: Starting minecraft server\n\
             [10:00:01] [Server thread/INFO]: RCON running on 0.0.0.0:25575\n",
        )
        .unwrap();

        let history = Arc::new(ConsoleHistory::new(100));
        let hub = Arc::new(BroadcastHub::new(Arc::clone(&history), 5));
        let monitor = monitor(&history, &hub);
        let (sub, mut rx) = ChannelSubscriber::new();
        hub.subscribe(Channel::Instance("a".to_string()), Arc::new(sub));

        assert!(monitor.start_monitoring("a", tmp.path()).unwrap());
        assert_eq!(history.len("a"), 1);

        let mut file = fs::OpenOptions::new().append(true).open(&log_path).unwrap();
        writeln!(file, "[10:00:02] [Server thread/INFO]: Steve joined the game").unwrap();
        write!(file, "[10:00:03] [Server thread/WARN]: partial").unwrap();
        file.flush().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while history.len("a") < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let all = history.all("a");
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].kind, MessageType::PlayerJoin);

        // welcome, history backfill, then the live line
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        assert!(frames.iter().any(|f| f.contains("Steve joined the game")));

        monitor.stop_monitoring("a");
        assert!(!monitor.is_monitoring("a"));
    }
}
