use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Info,
    Warning,
    Error,
    Command,
    PlayerJoin,
    PlayerLeave,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Server,
    Admin,
    System,
}

/// One line of console output as shown to viewers. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub message: String,
    pub timestamp: NaiveDateTime,
    pub source: Source,
}

impl ConsoleMessage {
    pub fn new(kind: MessageType, message: impl Into<String>, source: Source) -> Self {
        Self::at(kind, message, source, Local::now().naive_local())
    }

    pub fn at(
        kind: MessageType,
        message: impl Into<String>,
        source: Source,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp,
            source,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(MessageType::Info, message, Source::System)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(MessageType::Warning, message, Source::System)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(MessageType::Error, message, Source::System)
    }

    /// Echo of an operator-issued command.
    pub fn command(message: impl Into<String>) -> Self {
        Self::new(MessageType::Command, message, Source::Admin)
    }
}
