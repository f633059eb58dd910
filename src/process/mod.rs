//! Server process supervision.

mod commands;
mod control;
mod responses;
mod runtime;
mod supervisor;

pub use commands::{AdminCommand, GameMode};
pub use control::{force_kill, is_process_alive, terminate, wait_for_exit};
pub use responses::{PlayerList, ResponseParser};
pub use runtime::{format_duration, format_uptime, RuntimeRegistry, RuntimeState};
pub use supervisor::{Supervisor, Transition};
