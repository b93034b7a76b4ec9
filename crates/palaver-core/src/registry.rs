//! Connection registry for Palaver.
//!
//! The registry is the authoritative map from connection identifier to
//! connection state: the identity the connection claims, the rooms it has
//! joined, and the outbound send primitive the transport layer handed over
//! at registration.

use crate::rooms::RoomId;
use crate::RelayError;
use dashmap::DashMap;
use palaver_protocol::ServerEvent;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A connection identifier. Opaque, transport-assigned, unique for the
/// session's lifetime.
pub type ConnectionId = String;

/// The per-connection send primitive supplied by the transport layer.
///
/// Sends are fire-and-forget: the queue is unbounded, so enqueueing never
/// blocks a room operation on a slow peer.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Live state for one transport session.
#[derive(Debug)]
struct ConnectionEntry {
    /// Caller-supplied identity, last value wins. Absent until first join.
    identity: Option<String>,
    /// Rooms this connection has joined (connection-side half of the
    /// redundant membership index; keeps disconnect cleanup O(rooms joined)).
    rooms: HashSet<RoomId>,
    /// Outbound queue to the remote peer.
    sender: EventSender,
}

/// Snapshot of a connection's state returned by [`ConnectionRegistry::unregister`].
#[derive(Debug)]
pub struct ConnectionSnapshot {
    /// Last identity recorded for the connection, if any.
    pub identity: Option<String>,
    /// Rooms the connection belonged to at unregistration.
    pub rooms: HashSet<RoomId>,
}

/// Authoritative registry of live connections.
///
/// A connection exists in the registry iff its transport session is open.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection with no identity and no rooms.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateConnection`] if the id is already
    /// registered.
    pub fn register(
        &self,
        connection_id: impl Into<ConnectionId>,
        sender: EventSender,
    ) -> Result<(), RelayError> {
        let conn_id = connection_id.into();

        match self.connections.entry(conn_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(RelayError::DuplicateConnection(conn_id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(ConnectionEntry {
                    identity: None,
                    rooms: HashSet::new(),
                    sender,
                });
                debug!(connection = %conn_id, "Connection registered");
                Ok(())
            }
        }
    }

    /// Record the identity a connection claims. Last value wins.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownConnection`] if the id is not registered.
    pub fn set_identity(&self, connection_id: &str, identity: &str) -> Result<(), RelayError> {
        let mut entry = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RelayError::UnknownConnection(connection_id.to_string()))?;

        entry.identity = Some(identity.to_string());
        Ok(())
    }

    /// Add a room to the connection's joined set. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownConnection`] if the id is not registered.
    pub fn track_room(&self, connection_id: &str, room_id: &str) -> Result<(), RelayError> {
        let mut entry = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RelayError::UnknownConnection(connection_id.to_string()))?;

        entry.rooms.insert(room_id.to_string());
        Ok(())
    }

    /// Remove a room from the connection's joined set. Removing a room the
    /// connection never joined is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownConnection`] if the id is not registered.
    pub fn untrack_room(&self, connection_id: &str, room_id: &str) -> Result<(), RelayError> {
        let mut entry = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RelayError::UnknownConnection(connection_id.to_string()))?;

        entry.rooms.remove(room_id);
        Ok(())
    }

    /// Remove a connection and return the snapshot that drives disconnect
    /// cleanup.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownConnection`] if the id is not registered
    /// (disconnect-after-disconnect can race with transport retries; callers
    /// treat this as a warn-level no-op).
    pub fn unregister(&self, connection_id: &str) -> Result<ConnectionSnapshot, RelayError> {
        let (_, entry) = self
            .connections
            .remove(connection_id)
            .ok_or_else(|| RelayError::UnknownConnection(connection_id.to_string()))?;

        debug!(
            connection = %connection_id,
            rooms = entry.rooms.len(),
            "Connection unregistered"
        );

        Ok(ConnectionSnapshot {
            identity: entry.identity,
            rooms: entry.rooms,
        })
    }

    /// Deliver an event to a connection's outbound queue, fire-and-forget.
    ///
    /// A missing entry or a closed queue drops the event silently; best-effort
    /// fan-out never errors.
    pub fn deliver(&self, connection_id: &str, event: ServerEvent) {
        if let Some(entry) = self.connections.get(connection_id) {
            if entry.sender.send(event).is_err() {
                trace!(connection = %connection_id, "Dropped event for closing connection");
            }
        } else {
            trace!(connection = %connection_id, "Dropped event for unknown connection");
        }
    }

    /// Check whether a connection is registered.
    #[must_use]
    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Get the identity a connection last claimed.
    #[must_use]
    pub fn identity_of(&self, connection_id: &str) -> Option<String> {
        self.connections
            .get(connection_id)
            .and_then(|e| e.identity.clone())
    }

    /// Get the rooms a connection has joined.
    #[must_use]
    pub fn rooms_of(&self, connection_id: &str) -> Vec<RoomId> {
        self.connections
            .get(connection_id)
            .map(|e| e.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn sender() -> (EventSender, mpsc::UnboundedReceiver<ServerEvent>) {
        unbounded_channel()
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = sender();

        registry.register("conn-1", tx).unwrap();
        assert!(registry.contains("conn-1"));
        assert_eq!(registry.connection_count(), 1);

        let snapshot = registry.unregister("conn-1").unwrap();
        assert!(snapshot.identity.is_none());
        assert!(snapshot.rooms.is_empty());
        assert!(!registry.contains("conn-1"));
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();

        registry.register("conn-1", tx1).unwrap();
        assert!(matches!(
            registry.register("conn-1", tx2),
            Err(RelayError::DuplicateConnection(_))
        ));
    }

    #[test]
    fn test_identity_last_value_wins() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = sender();
        registry.register("conn-1", tx).unwrap();

        registry.set_identity("conn-1", "alice").unwrap();
        registry.set_identity("conn-1", "alice2").unwrap();
        assert_eq!(registry.identity_of("conn-1"), Some("alice2".to_string()));
    }

    #[test]
    fn test_unknown_connection_errors() {
        let registry = ConnectionRegistry::new();

        assert!(matches!(
            registry.set_identity("ghost", "alice"),
            Err(RelayError::UnknownConnection(_))
        ));
        assert!(matches!(
            registry.track_room("ghost", "r1"),
            Err(RelayError::UnknownConnection(_))
        ));
        assert!(matches!(
            registry.unregister("ghost"),
            Err(RelayError::UnknownConnection(_))
        ));
    }

    #[test]
    fn test_unregister_returns_room_snapshot() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = sender();
        registry.register("conn-1", tx).unwrap();

        registry.track_room("conn-1", "r1").unwrap();
        registry.track_room("conn-1", "r2").unwrap();
        registry.track_room("conn-1", "r1").unwrap();
        registry.untrack_room("conn-1", "r2").unwrap();

        let snapshot = registry.unregister("conn-1").unwrap();
        assert_eq!(snapshot.rooms.len(), 1);
        assert!(snapshot.rooms.contains("r1"));
    }

    #[test]
    fn test_deliver_to_queue() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = sender();
        registry.register("conn-1", tx).unwrap();

        registry.deliver("conn-1", ServerEvent::user_typing("alice", true));
        assert!(rx.try_recv().is_ok());

        // Unknown target drops silently
        registry.deliver("ghost", ServerEvent::user_typing("alice", true));
    }

    #[test]
    fn test_deliver_to_closed_queue_is_silent() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = sender();
        registry.register("conn-1", tx).unwrap();
        drop(rx);

        registry.deliver("conn-1", ServerEvent::user_typing("alice", true));
    }
}
