//! Envelopes exchanged with viewers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Console,
    Status,
    History,
    SystemStats,
    Installation,
}

/// `{type, data, timestamp}` with the timestamp in epoch milliseconds.
#[derive(Debug, Serialize)]
pub struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: &'a T,
    pub timestamp: i64,
}

impl<'a, T: Serialize> Envelope<'a, T> {
    pub fn new(kind: EventKind, data: &'a T) -> Self {
        Self {
            kind,
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Messages a viewer may send on its stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Command {
        #[serde(default)]
        message: String,
    },
    RequestStatus,
    RequestHistory,
}
