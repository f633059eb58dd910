//! Persistent instance records.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use super::types::Instance;
use crate::error::{AppError, Result};

/// Source of truth for instance state. Callers re-fetch for every operation.
pub trait InstanceStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Instance>;
    fn save(&self, instance: &Instance) -> Result<()>;
    fn delete(&self, id: &str) -> Result<()>;
    fn list_all(&self) -> Result<Vec<Instance>>;

    /// Read-modify-write a single record under the store's write lock.
    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Instance)) -> Result<Instance>;

    /// Every game and RCON port recorded on any instance.
    fn allocated_ports(&self) -> Result<HashSet<u16>> {
        let mut ports = HashSet::new();
        for instance in self.list_all()? {
            if instance.port > 0 {
                ports.insert(instance.port);
            }
            if instance.rcon_port > 0 {
                ports.insert(instance.rcon_port);
            }
        }
        Ok(ports)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InstanceFile {
    #[serde(default)]
    instances: BTreeMap<String, Instance>,
}

/// TOML file store with a cached snapshot and locked writes.
pub struct TomlInstanceStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    cache: RwLock<Arc<InstanceFile>>,
}

impl TomlInstanceStore {
    pub fn open(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| AppError::config(e.to_string()))?;
            toml::from_str(&content)?
        } else {
            InstanceFile::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
            cache: RwLock::new(Arc::new(file)),
        })
    }

    fn snapshot(&self) -> Arc<InstanceFile> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&cache)
    }

    fn with_file_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut InstanceFile) -> Result<T>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.snapshot();

        let mut updated = (*current).clone();
        let result = f(&mut updated)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| AppError::io(e.to_string()))?;
        }
        let content = toml::to_string_pretty(&updated)?;
        fs::write(&self.path, content).map_err(|e| AppError::config(e.to_string()))?;

        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(updated);
        Ok(result)
    }
}

impl InstanceStore for TomlInstanceStore {
    fn get(&self, id: &str) -> Result<Instance> {
        self.snapshot()
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::instance_not_found(id))
    }

    fn save(&self, instance: &Instance) -> Result<()> {
        self.with_file_mut(|file| {
            file.instances
                .insert(instance.id.clone(), instance.clone());
            Ok(())
        })
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.with_file_mut(|file| {
            file.instances
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| AppError::instance_not_found(id))
        })
    }

    fn list_all(&self) -> Result<Vec<Instance>> {
        Ok(self.snapshot().instances.values().cloned().collect())
    }

    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Instance)) -> Result<Instance> {
        self.with_file_mut(|file| {
            let instance = file
                .instances
                .get_mut(id)
                .ok_or_else(|| AppError::instance_not_found(id))?;
            f(instance);
            Ok(instance.clone())
        })
    }
}

/// Volatile store, used when persistence is handled elsewhere.
#[derive(Default)]
pub struct MemoryInstanceStore {
    instances: RwLock<BTreeMap<String, Instance>>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstanceStore for MemoryInstanceStore {
    fn get(&self, id: &str) -> Result<Instance> {
        let instances = self.instances.read().unwrap_or_else(|e| e.into_inner());
        instances
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::instance_not_found(id))
    }

    fn save(&self, instance: &Instance) -> Result<()> {
        let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
        instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
        instances
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AppError::instance_not_found(id))
    }

    fn list_all(&self) -> Result<Vec<Instance>> {
        let instances = self.instances.read().unwrap_or_else(|e| e.into_inner());
        Ok(instances.values().cloned().collect())
    }

    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Instance)) -> Result<Instance> {
        let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| AppError::instance_not_found(id))?;
        f(instance);
        Ok(instance.clone())
    }
}
