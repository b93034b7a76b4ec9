//! Presence coordination for Palaver.
//!
//! The coordinator orchestrates join and leave: it validates inputs, mutates
//! the connection registry and room directory as a pair, and emits
//! `user-joined` / `user-left` notices to the affected room's members.

use crate::registry::ConnectionRegistry;
use crate::rooms::{validate_room_name, RoomDirectory};
use crate::RelayError;
use palaver_protocol::ServerEvent;
use std::sync::Arc;
use tracing::debug;

fn validate_identity(identity: &str) -> Result<(), RelayError> {
    if identity.is_empty() {
        return Err(RelayError::InvalidPayload("Identity cannot be empty"));
    }
    Ok(())
}

/// Orchestrates room membership changes and presence notices.
#[derive(Debug, Clone)]
pub struct PresenceCoordinator {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomDirectory>,
}

impl PresenceCoordinator {
    /// Create a coordinator over the shared registry and directory.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, rooms: Arc<RoomDirectory>) -> Self {
        Self { registry, rooms }
    }

    /// Handle a `join-room` event.
    ///
    /// Records the identity, adds membership on both sides of the index, and
    /// emits `user-joined` to every other current member. Emission happens
    /// after membership is recorded, so the joiner never receives its own
    /// echo and a concurrently-joining peer observes a member set that
    /// already includes this connection. Every join call emits, including
    /// duplicate joins.
    ///
    /// Returns the number of peers notified.
    ///
    /// # Errors
    ///
    /// [`RelayError::InvalidPayload`] if the room or identity is empty or the
    /// room name is malformed (operation dropped, nothing emitted);
    /// [`RelayError::UnknownConnection`] if the connection was never
    /// registered, which indicates a transport-binding logic fault.
    pub fn handle_join(
        &self,
        connection_id: &str,
        room_id: &str,
        identity: &str,
    ) -> Result<usize, RelayError> {
        validate_room_name(room_id).map_err(RelayError::InvalidPayload)?;
        validate_identity(identity)?;

        self.registry.set_identity(connection_id, identity)?;
        self.registry.track_room(connection_id, room_id)?;
        let peers = self.rooms.join(room_id, connection_id);

        let event = ServerEvent::user_joined(identity);
        for peer in &peers {
            self.registry.deliver(peer, event.clone());
        }

        debug!(
            connection = %connection_id,
            room = %room_id,
            identity = %identity,
            notified = peers.len(),
            "Join handled"
        );

        Ok(peers.len())
    }

    /// Handle a `leave-room` event.
    ///
    /// Removes membership first, then emits `user-left` to the remaining
    /// members; the leaver is no longer a member and so is naturally
    /// excluded. A connection that was never a member of the room is not an
    /// error, and the notice is still emitted to the room's members.
    ///
    /// Returns the number of members notified.
    ///
    /// # Errors
    ///
    /// [`RelayError::InvalidPayload`] if the room or identity is empty;
    /// [`RelayError::UnknownConnection`] if the connection was never
    /// registered.
    pub fn handle_leave(
        &self,
        connection_id: &str,
        room_id: &str,
        identity: &str,
    ) -> Result<usize, RelayError> {
        validate_room_name(room_id).map_err(RelayError::InvalidPayload)?;
        validate_identity(identity)?;

        self.registry.untrack_room(connection_id, room_id)?;
        let remaining = self.rooms.leave(room_id, connection_id);

        let event = ServerEvent::user_left(identity);
        for peer in &remaining {
            self.registry.deliver(peer, event.clone());
        }

        debug!(
            connection = %connection_id,
            room = %room_id,
            identity = %identity,
            notified = remaining.len(),
            "Leave handled"
        );

        Ok(remaining.len())
    }
}
