//! Console output: classification, bounded history and log tailing.

mod history;
mod message;
mod monitor;
mod parser;

pub use history::ConsoleHistory;
pub use message::{ConsoleMessage, MessageType, Source};
pub use monitor::LogMonitor;
pub use parser::LogParser;
