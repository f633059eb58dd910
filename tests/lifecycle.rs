mod common;

use std::fs;
use std::sync::Arc;

use mcserver_manager::console::MessageType;
use mcserver_manager::hub::{ChannelSubscriber, InboundEvent};
use mcserver_manager::instance::{InstanceStore, Status};

use common::{harness, test_config};

#[tokio::test]
async fn stop_on_stopped_instance_is_idempotent() {
    let h = harness(&test_config(47100), 0);
    let instance = h.pending_instance("idle");
    h.store
        .update(&instance.id, &mut |i| i.status = Status::Stopped)
        .unwrap();

    assert!(h.state.stop_instance(&instance.id).await);
    assert!(h.state.stop_instance(&instance.id).await);

    let record = h.store.get(&instance.id).unwrap();
    assert_eq!(record.pid, None);
    assert_eq!(record.status, Status::Stopped);
    assert!(!h.state.supervisor().is_running(&instance.id));
}

#[tokio::test]
async fn start_refuses_uninstalled_instance() {
    let h = harness(&test_config(47200), 0);
    let instance = h.pending_instance("fresh");

    assert!(!h.state.start_instance(&instance.id).await);
    let history = h.state.console_history(&instance.id, None);
    let last = history.last().unwrap();
    assert_eq!(last.kind, MessageType::Error);
    assert!(last.message.starts_with("[ERROR] Failed to start server"));
}

#[tokio::test]
async fn unknown_ids_fail_without_panicking() {
    let h = harness(&test_config(47300), 0);
    assert!(!h.state.start_instance("not-a-uuid").await);
    assert!(!h.state.stop_instance("not-a-uuid").await);
    assert!(h.state.server_status("not-a-uuid").await.is_err());
}

#[tokio::test]
async fn inbound_command_echoes_then_reports_failure() {
    let h = harness(&test_config(47400), 0);
    let instance = h.pending_instance("offline");
    let (conn, _rx) = ChannelSubscriber::new();

    h.state
        .handle_inbound(
            &instance.id,
            InboundEvent::Command {
                message: "   ".to_string(),
            },
            &conn,
        )
        .await;
    assert!(h.state.console_history(&instance.id, None).is_empty());

    h.state
        .handle_inbound(
            &instance.id,
            InboundEvent::Command {
                message: "list".to_string(),
            },
            &conn,
        )
        .await;
    let history = h.state.console_history(&instance.id, None);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, MessageType::Command);
    assert_eq!(history[0].message, "> list");
    assert_eq!(history[1].message, "Failed to execute command: list");
}

#[tokio::test]
async fn request_status_replies_to_the_asking_session_only() {
    let h = harness(&test_config(47500), 0);
    let instance = h.pending_instance("status");
    let (conn, mut rx) = ChannelSubscriber::new();

    h.state
        .handle_inbound(&instance.id, InboundEvent::RequestStatus, &conn)
        .await;

    let frame = rx.try_recv().unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["type"], "status");
    assert_eq!(value["data"]["online"], false);
    assert_eq!(value["data"]["uptime"], "Offline");
    assert_eq!(value["data"]["maxPlayers"], 20);
}

#[tokio::test]
async fn delete_removes_files_record_and_history() {
    let h = harness(&test_config(47600), 0);
    let instance = h.pending_instance("doomed");
    fs::create_dir_all(instance.root.join("world")).unwrap();
    h.state.clear_console_history(&instance.id);
    assert_eq!(h.state.console_history(&instance.id, None).len(), 1);

    h.state.delete_instance(&instance.id).await.unwrap();

    assert!(!instance.root.exists());
    assert!(h.store.get(&instance.id).is_err());
    assert!(h.state.console_history(&instance.id, None).is_empty());
}

#[cfg(unix)]
mod process {
    use std::os::unix::fs::PermissionsExt as _;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Stand-in for `java`: writes a log line, then idles until signalled.
    fn fake_java(dir: &std::path::Path) -> String {
        let path = dir.join("fake-java");
        fs::write(
            &path,
            "#!/bin/sh\nmkdir -p logs\necho '[12:00:00] [Server thread/INFO]: Done (1.0s)! For help, type \"help\"' > logs/latest.log\nexec sleep 30\n",
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn start_then_stop_clears_pid() {
        let mut config = test_config(47700);
        let tmp = tempfile::tempdir().unwrap();
        config.supervisor.java_command = fake_java(tmp.path());
        let h = harness(&config, 0);

        let instance = h.pending_instance("live");
        fs::create_dir_all(&instance.root).unwrap();
        fs::write(instance.root.join(&instance.jar_file_name), b"jar").unwrap();
        h.store
            .update(&instance.id, &mut |i| i.status = Status::Stopped)
            .unwrap();

        assert!(h.state.start_instance(&instance.id).await);
        assert!(h.state.supervisor().is_running(&instance.id));
        let running = h.store.get(&instance.id).unwrap();
        assert_eq!(running.status, Status::Running);
        assert!(running.pid.is_some());

        // Second start is a no-op on the live process.
        assert!(h.state.start_instance(&instance.id).await);
        assert_eq!(h.store.get(&instance.id).unwrap().pid, running.pid);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(h.state.stop_instance(&instance.id).await);
        let stopped = h.store.get(&instance.id).unwrap();
        assert_eq!(stopped.pid, None);
        assert_eq!(stopped.status, Status::Stopped);
        assert!(!h.state.supervisor().is_running(&instance.id));
    }

    #[tokio::test]
    async fn restart_relaunches_the_process() {
        let mut config = test_config(47800);
        let tmp = tempfile::tempdir().unwrap();
        config.supervisor.java_command = fake_java(tmp.path());
        let h = harness(&config, 0);

        let instance = h.pending_instance("bounce");
        fs::create_dir_all(&instance.root).unwrap();
        fs::write(instance.root.join(&instance.jar_file_name), b"jar").unwrap();
        h.store
            .update(&instance.id, &mut |i| i.status = Status::Stopped)
            .unwrap();

        assert!(h.state.start_instance(&instance.id).await);
        let first = h.store.get(&instance.id).unwrap().pid;
        assert!(h.state.restart_instance(&instance.id).await);
        let second = h.store.get(&instance.id).unwrap().pid;
        assert!(second.is_some());
        assert_ne!(first, second);

        assert!(h.state.stop_instance(&instance.id).await);
    }

    #[tokio::test]
    async fn shutdown_releases_watchers_without_stalling_the_runtime() {
        let mut config = test_config(48500);
        let tmp = tempfile::tempdir().unwrap();
        config.supervisor.java_command = fake_java(tmp.path());
        let h = harness(&config, 0);

        let instance = h.pending_instance("lingering");
        fs::create_dir_all(&instance.root).unwrap();
        fs::write(instance.root.join(&instance.jar_file_name), b"jar").unwrap();
        h.store
            .update(&instance.id, &mut |i| i.status = Status::Stopped)
            .unwrap();

        assert!(h.state.start_instance(&instance.id).await);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !h.state.is_monitoring(&instance.id) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(h.state.is_monitoring(&instance.id));

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };
        h.state.shutdown().await;
        assert!(ticks.load(Ordering::SeqCst) > 0);
        ticker.abort();

        assert!(!h.state.is_monitoring(&instance.id));
        assert!(h.state.supervisor().is_running(&instance.id));
        assert!(h.state.stop_instance(&instance.id).await);
    }

    #[tokio::test]
    async fn health_check_reports_crash() {
        let mut config = test_config(47900);
        let tmp = tempfile::tempdir().unwrap();
        config.supervisor.java_command = fake_java(tmp.path());
        let h = harness(&config, 0);

        let instance = h.pending_instance("crashy");
        fs::create_dir_all(&instance.root).unwrap();
        fs::write(instance.root.join(&instance.jar_file_name), b"jar").unwrap();
        h.store
            .update(&instance.id, &mut |i| i.status = Status::Stopped)
            .unwrap();

        assert!(h.state.start_instance(&instance.id).await);
        h.state.scheduler().health_check().await;

        let pid = h.store.get(&instance.id).unwrap().pid.unwrap();
        mcserver_manager::process::force_kill(pid).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        h.state.scheduler().health_check().await;

        let history = h.state.console_history(&instance.id, None);
        assert!(history
            .iter()
            .any(|m| m.message == "[SYSTEM] Server appears to have stopped unexpectedly"));
        assert_eq!(h.store.get(&instance.id).unwrap().pid, None);
    }
}

#[tokio::test]
async fn subscribers_get_greeting_and_backfill() {
    let h = harness(&test_config(48000), 0);
    let instance = h.pending_instance("viewers");
    h.state.clear_console_history(&instance.id);

    let (conn, mut rx) = ChannelSubscriber::new();
    h.state.subscribe(
        mcserver_manager::hub::Channel::Instance(instance.id.clone()),
        Arc::new(conn),
    );
    let greeting = rx.try_recv().unwrap();
    assert!(greeting.contains("Console connected successfully"));
    let backfill = rx.try_recv().unwrap();
    assert!(backfill.contains("\"type\":\"history\""));
    assert!(backfill.contains("Console history cleared"));
}
