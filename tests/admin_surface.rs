mod common;

use std::collections::BTreeMap;
use std::fs;

use mcserver_manager::instance::{InstanceStore, Status};

use common::{harness, test_config};

#[tokio::test]
async fn property_updates_flag_restart_keys() {
    let h = harness(&test_config(48100), 0);
    let instance = h.pending_instance("props");
    fs::create_dir_all(&instance.root).unwrap();
    fs::write(
        instance.root.join("server.properties"),
        "#Minecraft server properties\nmotd=Old\nmax-players=20\n",
    )
    .unwrap();

    let updates = BTreeMap::from([("motd".to_string(), "New".to_string())]);
    let outcome = h.state.update_properties(&instance.id, &updates).await.unwrap();
    assert!(!outcome.requires_restart);
    assert_eq!(outcome.updated_count, 1);
    assert_eq!(outcome.message, "Properties updated successfully");

    let updates = BTreeMap::from([
        ("max-players".to_string(), "50".to_string()),
        ("difficulty".to_string(), "hard".to_string()),
    ]);
    let outcome = h.state.update_properties(&instance.id, &updates).await.unwrap();
    assert!(outcome.requires_restart);
    assert!(outcome.message.ends_with("(server restart required)"));

    let props = h.state.get_properties(&instance.id).unwrap();
    assert_eq!(props.get("motd").map(String::as_str), Some("New"));
    assert_eq!(props.get("max-players").map(String::as_str), Some("50"));
    assert_eq!(props.get("difficulty").map(String::as_str), Some("hard"));

    let history = h.state.console_history(&instance.id, None);
    assert_eq!(history[0].message, "[ADMIN] Updating 1 server properties");
}

#[tokio::test]
async fn whitelist_removal_is_case_insensitive() {
    let h = harness(&test_config(48200), 0);
    let instance = h.pending_instance("guests");
    fs::create_dir_all(&instance.root).unwrap();
    fs::write(
        instance.root.join("whitelist.json"),
        r#"[{"name":"Steve","uuid":"00000000-0000-0000-0000-000000000001"},{"name":"Alex","uuid":"00000000-0000-0000-0000-000000000002"}]"#,
    )
    .unwrap();

    assert!(h.state.remove_from_whitelist(&instance.id, "steve").await.unwrap());
    assert!(!h.state.remove_from_whitelist(&instance.id, "steve").await.unwrap());

    let names: Vec<String> = h
        .state
        .get_whitelist(&instance.id)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, ["Alex"]);
}

#[tokio::test]
async fn offline_backup_archives_worlds_and_can_be_deleted() {
    let h = harness(&test_config(48300), 0);
    let instance = h.pending_instance("archived");
    fs::create_dir_all(instance.root.join("world")).unwrap();
    fs::write(instance.root.join("world").join("level.dat"), b"level").unwrap();
    h.store
        .update(&instance.id, &mut |i| i.status = Status::Stopped)
        .unwrap();

    let path = h.state.backup_world(&instance.id).await.unwrap();
    assert!(path.exists());

    let backups = h.state.list_backups(&instance.id).unwrap();
    assert_eq!(backups.len(), 1);
    let name = &backups[0].filename;
    assert!(name.starts_with("world_backup_") && name.ends_with(".tar.gz"));
    assert!(backups[0].size > 0);

    let history = h.state.console_history(&instance.id, None);
    assert!(history
        .iter()
        .any(|m| m.message == "[SYSTEM] World backup created successfully"));

    h.state.delete_backup(&instance.id, name).unwrap();
    assert!(h.state.list_backups(&instance.id).unwrap().is_empty());
    assert!(h.state.delete_backup(&instance.id, "../eula.txt").is_err());
}

#[tokio::test]
async fn backup_without_worlds_reports_failure() {
    let h = harness(&test_config(48400), 0);
    let instance = h.pending_instance("empty");
    fs::create_dir_all(&instance.root).unwrap();

    assert!(h.state.backup_world(&instance.id).await.is_err());
    let last = h.state.console_history(&instance.id, None).pop().unwrap();
    assert_eq!(last.message, "[ERROR] Failed to create world backup");
}
