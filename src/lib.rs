//! Minecraft server instance management: installation, process
//! supervision, RCON, console tailing and live telemetry.

pub mod archive;
pub mod backup;
pub mod commands;
pub mod config;
pub mod console;
pub mod download;
pub mod error;
pub mod hub;
pub mod install;
pub mod instance;
pub mod paths;
pub mod platform;
pub mod ports;
pub mod process;
pub mod properties;
pub mod rcon;
pub mod scheduler;
pub mod sysstats;
pub mod templates;
pub mod validation;

pub use commands::{AppState, Collaborators};
pub use error::{AppError, ErrorKind, Result};
