//! Fan-out of live events to connected viewers.
//!
//! Sessions are grouped by [`Channel`]. Each publish serialises once and
//! writes the same frame to every session on the channel; sessions that are
//! closed or fail the write are dropped in that same pass.

mod event;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

pub use event::{Envelope, EventKind, InboundEvent};

use crate::console::{ConsoleHistory, ConsoleMessage};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Instance(String),
    /// Progress of installations in flight.
    Installation,
    /// System-wide telemetry.
    AllInstances,
}

/// One open viewer connection.
pub trait Subscriber: Send + Sync {
    fn is_open(&self) -> bool;
    /// Queue a frame without blocking.
    fn send(&self, frame: &Arc<str>) -> Result<()>;
}

/// Subscriber backed by an unbounded channel drained by the transport.
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<Arc<str>>,
}

impl ChannelSubscriber {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Arc<str>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send(&self, frame: &Arc<str>) -> Result<()> {
        self.tx
            .send(Arc::clone(frame))
            .map_err(|_| AppError::io("subscriber disconnected"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

struct Session {
    id: SessionId,
    conn: Arc<dyn Subscriber>,
}

pub struct BroadcastHub {
    sessions: DashMap<Channel, Vec<Session>>,
    history: Arc<ConsoleHistory>,
    backfill: usize,
    next_id: AtomicU64,
    total: AtomicUsize,
}

impl BroadcastHub {
    pub fn new(history: Arc<ConsoleHistory>, backfill: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            history,
            backfill,
            next_id: AtomicU64::new(1),
            total: AtomicUsize::new(0),
        }
    }

    /// Register a connection, then greet it and replay recent history.
    ///
    /// The channel stays locked until the greeting is queued so no live
    /// event can overtake it.
    pub fn subscribe(&self, channel: Channel, conn: Arc<dyn Subscriber>) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut sessions = self.sessions.entry(channel.clone()).or_default();
        sessions.push(Session {
            id,
            conn: Arc::clone(&conn),
        });
        self.total.fetch_add(1, Ordering::Relaxed);

        let welcome = match &channel {
            Channel::Instance(instance_id) => ConsoleMessage::info(format!(
                "Console connected successfully to instance {}",
                instance_id
            )),
            Channel::Installation => ConsoleMessage::info("Console connected for installation."),
            Channel::AllInstances => ConsoleMessage::info("Console connected to system telemetry."),
        };
        if let Err(e) = unicast(conn.as_ref(), EventKind::Console, &welcome) {
            log::debug!("Failed to greet new session on {:?}: {}", channel, e);
        }

        if let Channel::Instance(instance_id) = &channel {
            let recent = self.history.recent(instance_id, self.backfill);
            if !recent.is_empty() {
                if let Err(e) = unicast(conn.as_ref(), EventKind::History, &recent) {
                    log::debug!("Failed to backfill session on {:?}: {}", channel, e);
                }
            }
        }

        log::info!(
            "Session {:?} subscribed to {:?} ({} on channel)",
            id,
            channel,
            sessions.len()
        );
        drop(sessions);
        id
    }

    pub fn unsubscribe(&self, channel: &Channel, id: SessionId) -> bool {
        let Some(mut sessions) = self.sessions.get_mut(channel) else {
            return false;
        };
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        let removed = before - sessions.len();
        drop(sessions);
        self.total.fetch_sub(removed, Ordering::Relaxed);
        removed > 0
    }

    /// Serialise once and deliver to every live session on the channel.
    /// Returns the number of sessions reached.
    pub fn publish<T: Serialize>(&self, channel: &Channel, kind: EventKind, data: &T) -> usize {
        let Some(mut sessions) = self.sessions.get_mut(channel) else {
            return 0;
        };
        if sessions.is_empty() {
            return 0;
        }

        let frame: Arc<str> = match serde_json::to_string(&Envelope::new(kind, data)) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                log::error!("Error serializing {:?} event for {:?}: {}", kind, channel, e);
                return 0;
            }
        };

        let before = sessions.len();
        sessions.retain(|s| s.conn.is_open() && s.conn.send(&frame).is_ok());
        let delivered = sessions.len();
        drop(sessions);

        let pruned = before - delivered;
        if pruned > 0 {
            self.total.fetch_sub(pruned, Ordering::Relaxed);
            log::debug!("Pruned {} dead sessions from {:?}", pruned, channel);
        }
        delivered
    }

    pub fn publish_console(&self, channel: &Channel, message: &ConsoleMessage) -> usize {
        self.publish(channel, EventKind::Console, message)
    }

    /// Record a message in the instance's history and push it to its viewers.
    pub fn announce(&self, instance_id: &str, message: ConsoleMessage) {
        self.publish_console(&Channel::Instance(instance_id.to_string()), &message);
        self.history.push(instance_id, message);
    }

    /// Reply to one session only.
    pub fn send_to<T: Serialize>(&self, conn: &dyn Subscriber, kind: EventKind, data: &T) -> Result<()> {
        unicast(conn, kind, data)
    }

    pub fn has_any_subscribers(&self) -> bool {
        self.total.load(Ordering::Relaxed) > 0
    }

    pub fn active_session_count(&self, channel: &Channel) -> usize {
        self.sessions.get(channel).map(|s| s.len()).unwrap_or(0)
    }

    /// Drop every session for an instance that no longer exists.
    pub fn close_channel(&self, channel: &Channel) {
        if let Some((_, sessions)) = self.sessions.remove(channel) {
            self.total.fetch_sub(sessions.len(), Ordering::Relaxed);
        }
    }
}

fn unicast<T: Serialize>(conn: &dyn Subscriber, kind: EventKind, data: &T) -> Result<()> {
    let text = serde_json::to_string(&Envelope::new(kind, data))?;
    conn.send(&Arc::from(text))
}
