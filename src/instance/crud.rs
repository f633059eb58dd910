//! Instance CRUD operations.

use std::fs;

use super::store::InstanceStore;
use super::types::{Instance, Status};
use crate::error::{AppError, Result};
use crate::paths::get_servers_dir;
use crate::templates::Template;
use crate::validation::validate_server_name;

/// Register a new instance for a template. Nothing is downloaded yet.
pub fn create_instance(store: &dyn InstanceStore, name: &str, template: &Template) -> Result<Instance> {
    validate_server_name(name)?;

    let root = get_servers_dir().join(name);
    if store.list_all()?.iter().any(|i| i.root == root) {
        return Err(AppError::other(format!(
            "An instance already uses {}",
            root.display()
        )));
    }

    let mut instance = Instance::new(name, root, &template.jar_file_name());
    instance.server_type = template.server_type.clone();
    instance.template_id = Some(template.id.clone());
    instance.status_message = Some("Awaiting installation".to_string());

    store.save(&instance)?;
    log::info!(
        "Created instance {} ({}) from template {}",
        instance.name,
        instance.id,
        template.id
    );
    Ok(instance)
}

/// Persist a status transition together with its message.
pub fn set_status(
    store: &dyn InstanceStore,
    id: &str,
    status: Status,
    message: &str,
) -> Result<Instance> {
    store.update(id, &mut |instance| {
        instance.status = status;
        instance.status_message = Some(message.to_string());
    })
}

/// Remove an instance's files and record. Callers stop the process first.
pub fn remove_instance(store: &dyn InstanceStore, id: &str) -> Result<()> {
    let instance = store.get(id)?;

    if instance.root.exists() {
        if let Err(e) = fs::remove_dir_all(&instance.root) {
            log::warn!(
                "Failed to remove instance directory {:?}: {}",
                instance.root,
                e
            );
        }
    }

    store.delete(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::store::MemoryInstanceStore;
    use crate::templates::StepKind;

    fn template() -> Template {
        serde_json::from_value(serde_json::json!({
            "id": "vanilla",
            "name": "Vanilla",
            "downloadUrl": "https://example.org/files/server-1.21.jar",
            "type": "Vanilla",
            "installationSteps": [{"type": "DOWNLOAD", "command": ""}]
        }))
        .unwrap()
    }

    #[test]
    fn new_instances_await_installation() {
        let store = MemoryInstanceStore::new();
        let tpl = template();
        assert_eq!(tpl.installation_steps[0].kind, StepKind::Download);

        let instance = create_instance(&store, "lobby", &tpl).unwrap();
        assert_eq!(instance.status, Status::PendingInstallation);
        assert_eq!(instance.jar_file_name, "server-1.21.jar");
        assert_eq!(instance.ip, "0.0.0.0");
        assert_eq!(instance.port, 25565);
        assert!(!instance.rcon_enabled);
        assert!(instance.root.ends_with("servers/lobby"));

        assert!(create_instance(&store, "lobby", &tpl).is_err());
    }

    #[test]
    fn status_transition_keeps_message() {
        let store = MemoryInstanceStore::new();
        let instance = create_instance(&store, "survival", &template()).unwrap();
        let updated = set_status(&store, &instance.id, Status::Downloading, "Downloading server files...")
            .unwrap();
        assert_eq!(updated.status, Status::Downloading);
        assert_eq!(
            updated.status_message.as_deref(),
            Some("Downloading server files...")
        );
    }

    #[test]
    fn remove_deletes_directory_and_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryInstanceStore::new();
        let mut instance = Instance::new("x", tmp.path().join("x"), "server.jar");
        fs::create_dir_all(instance.root.join("world")).unwrap();
        instance.port = 25570;
        store.save(&instance).unwrap();

        remove_instance(&store, &instance.id).unwrap();
        assert!(!instance.root.exists());
        assert!(store.get(&instance.id).is_err());
    }
}
