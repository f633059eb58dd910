//! Instance records and their persistence.
//!
//! Layout on disk:
//! - instances.toml - one record per instance
//! - servers/{name}/ - server root (jar, server.properties, worlds, logs)
//! - servers/{name}/backups/ - world backups

mod crud;
mod store;
mod types;

pub use crud::{create_instance, remove_instance, set_status};
pub use store::{InstanceStore, MemoryInstanceStore, TomlInstanceStore};
pub use types::{DetailedServerInfo, Instance, ServerStatus, Status};
