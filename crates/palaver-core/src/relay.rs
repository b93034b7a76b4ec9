//! Message and typing-indicator fan-out for Palaver.
//!
//! The relay engine looks up current room membership and delivers an outbound
//! event to each member except the sender. Delivery is best-effort,
//! at-most-once: no confirmation, no retry, no buffering for slow receivers
//! beyond each connection's own outbound queue.

use crate::registry::ConnectionRegistry;
use crate::rooms::{validate_room_name, RoomDirectory};
use crate::RelayError;
use palaver_protocol::ServerEvent;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Current time in milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Fans out chat messages and typing indicators to room members.
///
/// The sender is not required to be a recorded member of the room it
/// messages; the claimed identity is relayed as-is. Both are deliberate
/// mirrors of the source system's permissive policy.
#[derive(Debug, Clone)]
pub struct RelayEngine {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomDirectory>,
}

impl RelayEngine {
    /// Create a relay engine over the shared registry and directory.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, rooms: Arc<RoomDirectory>) -> Self {
        Self { registry, rooms }
    }

    /// Handle a `send-message` event.
    ///
    /// Stamps the event with a server-assigned timestamp captured at the
    /// moment of the membership lookup and delivers `receive-message` to
    /// every member except the sender. Returns the number of members the
    /// event was handed to.
    ///
    /// # Errors
    ///
    /// [`RelayError::InvalidPayload`] if the room, identity, or message text
    /// is empty; the operation is dropped and nothing is emitted.
    pub fn handle_message(
        &self,
        connection_id: &str,
        room_id: &str,
        identity: &str,
        text: &str,
    ) -> Result<usize, RelayError> {
        validate_room_name(room_id).map_err(RelayError::InvalidPayload)?;
        if identity.is_empty() {
            return Err(RelayError::InvalidPayload("Identity cannot be empty"));
        }
        if text.is_empty() {
            return Err(RelayError::InvalidPayload("Message cannot be empty"));
        }

        let timestamp = now_millis();
        let members = self.rooms.members_of(room_id);
        let event = ServerEvent::receive_message(identity, text, timestamp);

        let delivered = self.fan_out(connection_id, &members, event);

        trace!(
            connection = %connection_id,
            room = %room_id,
            recipients = delivered,
            "Message relayed"
        );

        Ok(delivered)
    }

    /// Handle a `typing` event.
    ///
    /// Delivers `user-typing` to every member except the sender. No
    /// deduplication of rapid repeated calls: every call produces one event.
    ///
    /// # Errors
    ///
    /// [`RelayError::InvalidPayload`] if the room or identity is empty.
    pub fn handle_typing(
        &self,
        connection_id: &str,
        room_id: &str,
        identity: &str,
        is_typing: bool,
    ) -> Result<usize, RelayError> {
        validate_room_name(room_id).map_err(RelayError::InvalidPayload)?;
        if identity.is_empty() {
            return Err(RelayError::InvalidPayload("Identity cannot be empty"));
        }

        let members = self.rooms.members_of(room_id);
        let event = ServerEvent::user_typing(identity, is_typing);

        let delivered = self.fan_out(connection_id, &members, event);

        trace!(
            connection = %connection_id,
            room = %room_id,
            recipients = delivered,
            "Typing indicator relayed"
        );

        Ok(delivered)
    }

    fn fan_out(&self, sender_id: &str, members: &[String], event: ServerEvent) -> usize {
        let mut delivered = 0;
        for member in members {
            if member == sender_id {
                continue;
            }
            self.registry.deliver(member, event.clone());
            delivered += 1;
        }
        delivered
    }
}
