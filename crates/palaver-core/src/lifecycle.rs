//! Connection lifecycle binding for Palaver.
//!
//! The lifecycle manager is the seam between the transport layer's
//! connect/disconnect signals and the realtime core. On disconnect it removes
//! the connection from every room it belonged to, emitting `user-left`
//! notices as if the client had explicitly left each room, then discards the
//! registry entry.
//!
//! Per connection the states are `Connecting -> Connected -> Disconnected`
//! (terminal); within `Connected`, each room tracks `NotMember -> Member`
//! independently, and every sub-state collapses to removed on disconnect.

use crate::registry::{ConnectionRegistry, EventSender};
use crate::rooms::RoomDirectory;
use crate::RelayError;
use palaver_protocol::ServerEvent;
use std::sync::Arc;
use tracing::{debug, warn};

/// Binds transport connect/disconnect signals to registry and directory state.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomDirectory>,
}

impl LifecycleManager {
    /// Create a lifecycle manager over the shared registry and directory.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, rooms: Arc<RoomDirectory>) -> Self {
        Self { registry, rooms }
    }

    /// Handle a transport connect signal. Called exactly once per connection.
    ///
    /// # Errors
    ///
    /// [`RelayError::DuplicateConnection`] if the transport issued two
    /// connect hooks for one session; the caller must treat this as fatal for
    /// the session.
    pub fn on_connect(
        &self,
        connection_id: impl Into<String>,
        sender: EventSender,
    ) -> Result<(), RelayError> {
        self.registry.register(connection_id, sender)
    }

    /// Handle a transport disconnect signal. Called exactly once per
    /// connection; a second call for the same id (transport retry race) is a
    /// warn-level no-op.
    ///
    /// Visits every room the connection belonged to exactly once, performing
    /// the same membership removal and `user-left` emission as an explicit
    /// leave. A connection with no rooms produces no events. Returns the
    /// number of rooms cleaned up.
    pub fn on_disconnect(&self, connection_id: &str) -> usize {
        let snapshot = match self.registry.unregister(connection_id) {
            Ok(snapshot) => snapshot,
            Err(_) => {
                warn!(connection = %connection_id, "Disconnect for unknown connection, ignoring");
                return 0;
            }
        };

        let identity = snapshot.identity.unwrap_or_default();
        let cleaned = snapshot.rooms.len();

        for room_id in &snapshot.rooms {
            let remaining = self.rooms.leave(room_id, connection_id);
            let event = ServerEvent::user_left(&identity);
            for peer in &remaining {
                self.registry.deliver(peer, event.clone());
            }
        }

        debug!(
            connection = %connection_id,
            rooms = cleaned,
            "Disconnect cleanup complete"
        );

        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::PresenceCoordinator;
    use crate::relay::RelayEngine;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomDirectory>,
        coordinator: PresenceCoordinator,
        relay: RelayEngine,
        lifecycle: LifecycleManager,
    }

    fn setup() -> Harness {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomDirectory::new());
        Harness {
            registry: registry.clone(),
            rooms: rooms.clone(),
            coordinator: PresenceCoordinator::new(registry.clone(), rooms.clone()),
            relay: RelayEngine::new(registry.clone(), rooms.clone()),
            lifecycle: LifecycleManager::new(registry, rooms),
        }
    }

    fn connect(harness: &Harness, connection_id: &str) -> UnboundedReceiver<ServerEvent> {
        let (tx, rx) = unbounded_channel();
        harness.lifecycle.on_connect(connection_id, tx).unwrap();
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_duplicate_connect_is_fatal() {
        let harness = setup();
        let _rx = connect(&harness, "conn-a");

        let (tx, _rx2) = unbounded_channel();
        assert!(matches!(
            harness.lifecycle.on_connect("conn-a", tx),
            Err(RelayError::DuplicateConnection(_))
        ));
    }

    #[test]
    fn test_disconnect_cleans_every_room_exactly_once() {
        let harness = setup();
        let mut rx_a = connect(&harness, "conn-a");
        let _rx_b = connect(&harness, "conn-b");

        harness.coordinator.handle_join("conn-a", "r1", "alice").unwrap();
        harness.coordinator.handle_join("conn-a", "r2", "alice").unwrap();
        harness.coordinator.handle_join("conn-b", "r1", "bob").unwrap();
        harness.coordinator.handle_join("conn-b", "r2", "bob").unwrap();
        drain(&mut rx_a);

        let cleaned = harness.lifecycle.on_disconnect("conn-b");
        assert_eq!(cleaned, 2);

        assert!(!harness.registry.contains("conn-b"));
        assert!(!harness.rooms.is_member("r1", "conn-b"));
        assert!(!harness.rooms.is_member("r2", "conn-b"));

        // Exactly one user-left per room
        let events = drain(&mut rx_a);
        assert_eq!(events.len(), 2);
        for event in events {
            match event {
                ServerEvent::UserLeft { user_id, message } => {
                    assert_eq!(user_id, "bob");
                    assert_eq!(message, "User bob left the room");
                }
                other => panic!("Expected UserLeft, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_disconnect_of_sole_member_empties_rooms() {
        let harness = setup();
        let _rx = connect(&harness, "conn-a");

        harness.coordinator.handle_join("conn-a", "r1", "alice").unwrap();
        harness.coordinator.handle_join("conn-a", "r2", "alice").unwrap();

        harness.lifecycle.on_disconnect("conn-a");

        assert!(!harness.rooms.room_exists("r1"));
        assert!(!harness.rooms.room_exists("r2"));
        assert_eq!(harness.rooms.room_count(), 0);
    }

    #[test]
    fn test_disconnect_with_no_rooms_emits_nothing() {
        let harness = setup();
        let _rx_a = connect(&harness, "conn-a");
        let mut rx_b = connect(&harness, "conn-b");
        harness.coordinator.handle_join("conn-b", "r1", "bob").unwrap();

        let cleaned = harness.lifecycle.on_disconnect("conn-a");
        assert_eq!(cleaned, 0);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_disconnect_after_disconnect_is_noop() {
        let harness = setup();
        let _rx = connect(&harness, "conn-a");

        assert_eq!(harness.lifecycle.on_disconnect("conn-a"), 0);
        assert_eq!(harness.lifecycle.on_disconnect("conn-a"), 0);
    }

    #[test]
    fn test_scenario_message_between_members() {
        let harness = setup();
        let mut rx_a = connect(&harness, "conn-a");
        let mut rx_b = connect(&harness, "conn-b");

        harness.coordinator.handle_join("conn-a", "r1", "alice").unwrap();
        harness.coordinator.handle_join("conn-b", "r1", "bob").unwrap();
        drain(&mut rx_a);

        harness
            .relay
            .handle_message("conn-a", "r1", "alice", "hi")
            .unwrap();

        match rx_b.try_recv().unwrap() {
            ServerEvent::ReceiveMessage {
                user_id,
                message,
                timestamp,
            } => {
                assert_eq!(user_id, "alice");
                assert_eq!(message, "hi");
                assert!(timestamp > 0);
            }
            other => panic!("Expected ReceiveMessage, got {other:?}"),
        }
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_outbound_queue_is_observable_across_tasks() {
        let harness = setup();
        let _rx_a = connect(&harness, "conn-a");
        let mut rx_b = connect(&harness, "conn-b");

        harness.coordinator.handle_join("conn-b", "r1", "bob").unwrap();
        harness.coordinator.handle_join("conn-a", "r1", "alice").unwrap();

        let event = rx_b.recv().await.unwrap();
        assert!(matches!(event, ServerEvent::UserJoined { .. }));
    }
}
