//! Free TCP port selection for game and RCON listeners.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::config::{PortRange, PortSettings};
use crate::error::{AppError, Result};
use crate::instance::InstanceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Game,
    Rcon,
}

pub struct PortAllocator {
    settings: PortSettings,
    store: Arc<dyn InstanceStore>,
    allocation: Mutex<()>,
}

impl PortAllocator {
    pub fn new(settings: PortSettings, store: Arc<dyn InstanceStore>) -> Self {
        Self {
            settings,
            store,
            allocation: Mutex::new(()),
        }
    }

    fn range(&self, kind: PortKind) -> PortRange {
        match kind {
            PortKind::Game => self.settings.game,
            PortKind::Rcon => self.settings.rcon,
        }
    }

    /// Serialise allocate-then-persist sequences. Hold the guard until the
    /// chosen ports are saved on the instance.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.allocation.lock().await
    }

    /// Lowest port in the kind's range that no instance records and that
    /// the OS lets us bind right now.
    pub fn allocate(&self, kind: PortKind) -> Result<u16> {
        let used = self.store.allocated_ports()?;
        allocate_in_range(self.range(kind), &used)
    }
}

pub(crate) fn allocate_in_range(range: PortRange, used: &HashSet<u16>) -> Result<u16> {
    for port in range.start..=range.end {
        if used.contains(&port) {
            continue;
        }
        if check_port_available(port) {
            log::debug!("Allocated port {}", port);
            return Ok(port);
        }
    }
    Err(AppError::no_port_available(range.start, range.end))
}

/// Bind a throwaway listener; success proves the port is free right now.
pub fn check_port_available(port: u16) -> bool {
    std::net::TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{Instance, MemoryInstanceStore};
    use std::net::TcpListener;
    use std::path::PathBuf;

    fn free_port() -> u16 {
        TcpListener::bind(("0.0.0.0", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn skips_recorded_ports() {
        let start = free_port();
        let range = PortRange {
            start,
            end: start.saturating_add(50),
        };
        let used = HashSet::from([start]);
        let port = allocate_in_range(range, &used).unwrap();
        assert_ne!(port, start);
        assert!(port > start && port <= range.end);
    }

    #[test]
    fn skips_bound_ports_and_reports_exhaustion() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let range = PortRange {
            start: port,
            end: port,
        };
        let err = allocate_in_range(range, &HashSet::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NoPortAvailable);
        drop(listener);
    }

    #[tokio::test]
    async fn back_to_back_allocations_differ_once_persisted() {
        let store: Arc<dyn InstanceStore> = Arc::new(MemoryInstanceStore::new());
        let start = free_port();
        let settings = PortSettings {
            game: PortRange {
                start,
                end: start.saturating_add(40),
            },
            rcon: PortRange {
                start: start.saturating_add(41),
                end: start.saturating_add(80),
            },
        };
        let allocator = PortAllocator::new(settings, Arc::clone(&store));

        let mut seen = HashSet::new();
        for name in ["a", "b"] {
            let _guard = allocator.lock().await;
            let mut instance = Instance::new(name, PathBuf::from("/srv").join(name), "s.jar");
            instance.port = allocator.allocate(PortKind::Game).unwrap();
            instance.rcon_port = allocator.allocate(PortKind::Rcon).unwrap();
            assert!(seen.insert(instance.port));
            assert!(seen.insert(instance.rcon_port));
            store.save(&instance).unwrap();
        }
    }
}
