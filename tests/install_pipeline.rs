mod common;

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use mcserver_manager::hub::{Channel, ChannelSubscriber};
use mcserver_manager::instance::{InstanceStore, Status};
use mcserver_manager::properties::ServerProperties;

use common::{harness, test_config};

#[tokio::test]
async fn successful_install_reaches_stopped_with_ports_and_credentials() {
    let h = harness(&test_config(46100), 0);
    let instance = h.pending_instance("alpha");

    h.state.install_instance(&instance.id).await.unwrap();

    let installed = h.store.get(&instance.id).unwrap();
    assert_eq!(installed.status, Status::Stopped);
    assert_eq!(
        installed.status_message.as_deref(),
        Some("Installation completed successfully!")
    );
    assert!((46100..46150).contains(&installed.port));
    assert!((46150..46200).contains(&installed.rcon_port));
    assert_eq!(installed.rcon_password.as_deref().map(str::len), Some(16));
    assert!(installed.rcon_enabled);
    assert_eq!(installed.allocated_memory.as_deref(), Some("4G"));

    assert_eq!(
        h.downloader.urls.lock().unwrap().as_slice(),
        ["https://example.org/files/server-1.21.jar"]
    );
    let commands = h.executor.commands.lock().unwrap().clone();
    assert_eq!(
        commands,
        vec![vec![
            "java".to_string(),
            "-Xmx4G".to_string(),
            "-jar".to_string(),
            "server-1.21.jar".to_string(),
            "--initSettings".to_string(),
        ]]
    );
    assert_eq!(h.executor.boots.load(Ordering::SeqCst), 1);

    let root = &installed.root;
    assert_eq!(fs::read_to_string(root.join("eula.txt")).unwrap(), "eula=true");
    let props = ServerProperties::for_root(root);
    assert_eq!(props.get("server-port"), Some(installed.port.to_string()));
    assert_eq!(props.get("enable-rcon").as_deref(), Some("true"));
    assert_eq!(props.get("rcon.port"), Some(installed.rcon_port.to_string()));
    assert_eq!(props.get("rcon.password"), installed.rcon_password);
    assert_eq!(props.get("motd").as_deref(), Some("A Minecraft Server"));
}

#[tokio::test]
async fn failing_run_step_marks_installation_failed() {
    let h = harness(&test_config(46300), 2);
    let instance = h.pending_instance("broken");

    let err = h.state.install_instance(&instance.id).await.unwrap_err();
    assert!(err.message().contains("exit code: 2"));

    let failed = h.store.get(&instance.id).unwrap();
    assert_eq!(failed.status, Status::InstallationFailed);
    let message = failed.status_message.unwrap();
    assert!(message.starts_with("Installation failed:"));
    assert!(message.contains('2'));
    assert_eq!(failed.rcon_password, None);
    assert_eq!(h.executor.boots.load(Ordering::SeqCst), 0);

    let history = h.state.console_history(&instance.id, None);
    assert!(history
        .iter()
        .any(|m| m.message.starts_with("Installation failed:")));
}

#[tokio::test]
async fn back_to_back_installs_get_distinct_ports() {
    let h = harness(&test_config(46500), 0);
    let first = h.pending_instance("first");
    let second = h.pending_instance("second");

    h.state.install_instance(&first.id).await.unwrap();
    h.state.install_instance(&second.id).await.unwrap();

    let a = h.store.get(&first.id).unwrap();
    let b = h.store.get(&second.id).unwrap();
    let ports = [a.port, a.rcon_port, b.port, b.rcon_port];
    for (i, p) in ports.iter().enumerate() {
        assert!(!ports[i + 1..].contains(p), "port {p} allocated twice");
    }
    assert_ne!(a.rcon_password, b.rcon_password);
}

#[tokio::test]
async fn installation_channel_streams_progress() {
    let h = harness(&test_config(46700), 0);
    let instance = h.pending_instance("watched");
    let (subscriber, mut rx) = ChannelSubscriber::new();
    h.state.subscribe(Channel::Installation, Arc::new(subscriber));

    h.state.install_instance(&instance.id).await.unwrap();

    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame.to_string());
    }
    assert!(frames[0].contains("Console connected for installation."));
    let position = |needle: &str| {
        frames
            .iter()
            .position(|f| f.contains(needle))
            .unwrap_or_else(|| panic!("missing frame: {needle}"))
    };
    let started = position("Installation started for watched");
    let eula = position("EULA accepted");
    let configured = position("Server configured - Game Port:");
    let done = position("Your server is ready to start.");
    assert!(started < eula && eula < configured && configured < done);
}

#[tokio::test]
async fn reinstall_is_refused_while_installing() {
    let h = harness(&test_config(46900), 0);
    let instance = h.pending_instance("busy");
    h.store
        .update(&instance.id, &mut |i| i.status = Status::Configuring)
        .unwrap();

    assert!(h.state.install_instance(&instance.id).await.is_err());
    assert_eq!(h.executor.boots.load(Ordering::SeqCst), 0);
}
