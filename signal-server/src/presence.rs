//! Presence directory: which users currently have a live, addressable
//! connection, and the handle used to route events to them.
//!
//! Entries are removed outright when a connection goes away, never just
//! flagged, so the router can never pick up a dead handle.

use std::collections::HashMap;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerEvent;

/// A live connection handle for one reachable user.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub conn_id: Uuid,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl PresenceEntry {
    /// Best-effort delivery; a closed channel means the connection is
    /// already being torn down and the event is dropped.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

#[derive(Default)]
pub struct PresenceDirectory {
    entries: HashMap<String, PresenceEntry>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce a user as reachable on `conn_id`. A re-announce from a
    /// newer connection replaces the old handle.
    pub fn mark_reachable(
        &mut self,
        user_id: &str,
        conn_id: Uuid,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) {
        self.entries
            .insert(user_id.to_string(), PresenceEntry { conn_id, sender });
    }

    /// Remove a user's entry. Idempotent: called both from explicit
    /// `user_offline` events and from connection-loss detection.
    pub fn mark_unreachable(&mut self, user_id: &str) -> bool {
        self.entries.remove(user_id).is_some()
    }

    /// Remove a user's entry only if it still belongs to `conn_id`, so a
    /// stale connection's death cannot knock a re-announced user offline.
    pub fn mark_unreachable_if(&mut self, user_id: &str, conn_id: Uuid) -> bool {
        match self.entries.get(user_id) {
            Some(entry) if entry.conn_id == conn_id => {
                self.entries.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, user_id: &str) -> Option<&PresenceEntry> {
        self.entries.get(user_id)
    }

    pub fn is_reachable(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }
}
